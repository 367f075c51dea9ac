//! Skylark integration test harness.
//!
//! Gateways run in-process on loopback, each with its own chunk store and an
//! in-memory object store, so tests need no cloud credentials and no root.
//!
//!   cargo test --test integration
//!
//! Each test starts and shuts down its own gateways.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use bytes::Bytes;
use tokio::net::TcpStream;

use skylark_core::config::SkylarkConfig;
use skylark_core::wire::{read_header, read_payload, write_chunk, WireProtocolHeader};
use skylark_core::{Chunk, ChunkRequest, ChunkRequestHop, ChunkState};
use skylark_services::{BucketRef, GatewayControl, MemoryObjectStore};
use skylarkd::Gateway;

mod control;
mod failures;
mod relay;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SRC_REGION: &str = "aws:us-east-1";
pub const DST_REGION: &str = "gcp:us-central1";
pub const SRC_BUCKET: &str = "skylark-src";
pub const DST_BUCKET: &str = "skylark-dst";

pub fn src_bucket() -> BucketRef {
    BucketRef::new(SRC_REGION, SRC_BUCKET)
}

pub fn dst_bucket() -> BucketRef {
    BucketRef::new(DST_REGION, DST_BUCKET)
}

/// Loopback-only config with short timeouts and no boot-time servers.
pub fn test_config() -> SkylarkConfig {
    let mut config = SkylarkConfig::default();
    config.gateway.bind_host = "127.0.0.1".into();
    config.gateway.initial_servers = 0;
    config.gateway.workers = 8;
    config.transfer.hop_timeout_ms = 2_000;
    config.transfer.connect_timeout_ms = 1_000;
    config.transfer.idle_timeout_secs = 5;
    config.transfer.socket_buffer_bytes = 0;
    config
}

pub async fn start_gateway(objects: &MemoryObjectStore) -> Gateway {
    start_gateway_with(objects, |_| {}).await
}

pub async fn start_gateway_with(
    objects: &MemoryObjectStore,
    tweak: impl FnOnce(&mut SkylarkConfig),
) -> Gateway {
    let mut config = test_config();
    tweak(&mut config);
    Gateway::start(config, Arc::new(objects.clone()))
        .await
        .expect("gateway failed to start")
}

/// Deterministic, non-repeating test payload.
pub fn sample_object(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn chunk(id: u64, offset: u64, len: u64) -> Chunk {
    Chunk {
        key: "datasets/train.bin".into(),
        chunk_id: id,
        file_offset_bytes: offset,
        chunk_length_bytes: len,
    }
}

pub fn src_hop() -> ChunkRequestHop {
    ChunkRequestHop::src_object_store(SRC_REGION, "127.0.0.1", SRC_REGION, SRC_BUCKET)
}

pub fn dst_hop() -> ChunkRequestHop {
    ChunkRequestHop::dst_object_store(DST_REGION, "127.0.0.1", DST_REGION, DST_BUCKET)
}

pub fn relay_hop(addr: impl ToString) -> ChunkRequestHop {
    ChunkRequestHop::relay(DST_REGION, addr.to_string())
}

pub fn request(chunk: Chunk, path: Vec<ChunkRequestHop>) -> ChunkRequest {
    ChunkRequest::new(chunk, path)
}

/// Poll until `chunk_id` reaches `state`, or fail after `timeout`.
pub async fn wait_for_state(
    gateway: &Gateway,
    chunk_id: u64,
    state: ChunkState,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = gateway.store().get_state(chunk_id).ok();
        if current == Some(state) {
            return Ok(());
        }
        if let Some(s) = current {
            if s.is_terminal() {
                bail!("chunk {chunk_id} ended in {s}, expected {state}");
            }
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("chunk {chunk_id} still {current:?} after {timeout:?}, expected {state}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Open a relay connection to `port` and send `frames` as one stream.
pub async fn send_frames(port: u16, frames: &[(u64, &[u8])]) -> Result<()> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    for (i, (chunk_id, payload)) in frames.iter().enumerate() {
        let eos = i + 1 == frames.len();
        let header = WireProtocolHeader::new(*chunk_id, payload.len() as u64, eos);
        write_chunk(&mut stream, &header, payload).await?;
    }
    Ok(())
}

/// A bare TCP listener standing in for a downstream gateway. Collects frames
/// from one connection until `end_of_stream`.
pub struct FakePeer {
    pub addr: SocketAddr,
    frames: tokio::task::JoinHandle<Result<Vec<(WireProtocolHeader, Bytes)>>>,
}

impl FakePeer {
    pub async fn listen() -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let frames = tokio::spawn(collect_frames(listener));
        Ok(Self { addr, frames })
    }

    pub async fn frames(self, timeout: Duration) -> Result<Vec<(WireProtocolHeader, Bytes)>> {
        match tokio::time::timeout(timeout, self.frames).await {
            Ok(joined) => joined?,
            Err(_) => bail!("fake peer saw no end_of_stream within {timeout:?}"),
        }
    }
}

async fn collect_frames(
    listener: tokio::net::TcpListener,
) -> Result<Vec<(WireProtocolHeader, Bytes)>> {
    let (mut stream, _) = listener.accept().await?;
    let mut frames = Vec::new();
    loop {
        let header = read_header(&mut stream).await?;
        let payload = read_payload(&mut stream, header.chunk_len, u64::MAX).await?;
        let eos = header.end_of_stream;
        frames.push((header, payload));
        if eos {
            return Ok(frames);
        }
    }
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local_addr").port()
}

pub async fn first_port(gateway: &Gateway) -> u16 {
    match gateway.server_ports().first() {
        Some(p) => *p,
        None => gateway.start_server().await.expect("start_server"),
    }
}
