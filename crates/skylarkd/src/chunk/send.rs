//! Relay sender — owns outbound connections to downstream gateways.
//!
//! One task per destination address. Workers queue a job and wait for its
//! result; the task writes jobs back to back on one connection and marks the
//! last queued job of a burst with `end_of_stream`, after which the
//! connection is closed. A failed write drops the connection; the next job
//! reconnects.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use skylark_core::config::SkylarkConfig;
use skylark_core::wire::write_chunk;
use skylark_core::Chunk;
use skylark_services::TransferError;

const WRITE_BUFFER: usize = 256 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub default_port: u16,
    pub socket_buffer: usize,
}

impl RelaySettings {
    pub fn from_config(config: &SkylarkConfig) -> Self {
        Self {
            connect_timeout: config.transfer.connect_timeout(),
            write_timeout: config.transfer.hop_timeout(),
            default_port: config.gateway.default_relay_port,
            socket_buffer: config.transfer.socket_buffer_bytes,
        }
    }
}

struct RelayJob {
    chunk: Chunk,
    payload: Bytes,
    done: oneshot::Sender<Result<(), TransferError>>,
}

#[derive(Clone)]
pub struct RelayPool {
    senders: Arc<DashMap<SocketAddr, mpsc::UnboundedSender<RelayJob>>>,
    settings: RelaySettings,
}

impl RelayPool {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            senders: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Frame `payload` for `chunk` and write it to the gateway at `hop_address`.
    ///
    /// Resolves once the bytes are flushed to the socket, or with the error
    /// that stopped them.
    pub async fn send(
        &self,
        hop_address: &str,
        chunk: Chunk,
        payload: Bytes,
    ) -> Result<(), TransferError> {
        let addr = resolve(hop_address, self.settings.default_port).await?;
        let (done, result) = oneshot::channel();
        let job = RelayJob {
            chunk,
            payload,
            done,
        };

        let tx = self
            .senders
            .entry(addr)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(relay_task(addr, self.settings, rx));
                tx
            })
            .clone();

        if tx.send(job).is_err() {
            self.senders.remove(&addr);
            return Err(relay_error(addr, "relay task is gone"));
        }
        result
            .await
            .unwrap_or_else(|_| Err(relay_error(addr, "relay task dropped the job")))
    }
}

async fn relay_task(
    addr: SocketAddr,
    settings: RelaySettings,
    mut rx: mpsc::UnboundedReceiver<RelayJob>,
) {
    tracing::debug!(%addr, "relay sender started");
    let mut conn: Option<BufWriter<TcpStream>> = None;
    let mut sent_on_conn = 0u64;

    while let Some(job) = rx.recv().await {
        let end_of_stream = rx.is_empty();
        let chunk_id = job.chunk.chunk_id;
        let result = write_job(&mut conn, addr, &settings, &job, end_of_stream).await;

        match &result {
            Ok(()) => {
                sent_on_conn += 1;
                tracing::debug!(%addr, chunk_id, end_of_stream, "chunk relayed");
            }
            Err(e) => tracing::warn!(%addr, chunk_id, error = %e, "relay write failed"),
        }

        if result.is_err() || end_of_stream {
            if let Some(mut writer) = conn.take() {
                let _ = writer.shutdown().await;
                tracing::debug!(%addr, chunks = sent_on_conn, "relay connection closed");
            }
            sent_on_conn = 0;
        }
        let _ = job.done.send(result);
    }
}

async fn write_job(
    conn: &mut Option<BufWriter<TcpStream>>,
    addr: SocketAddr,
    settings: &RelaySettings,
    job: &RelayJob,
    end_of_stream: bool,
) -> Result<(), TransferError> {
    if conn.is_none() {
        let stream = tokio::time::timeout(settings.connect_timeout, connect(addr, settings))
            .await
            .map_err(|_| TransferError::Timeout {
                op: "relay connect",
                millis: settings.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| relay_error(addr, e))?;
        tracing::debug!(%addr, "relay connection opened");
        *conn = Some(BufWriter::with_capacity(WRITE_BUFFER, stream));
    }
    let writer = conn
        .as_mut()
        .ok_or_else(|| relay_error(addr, "no connection"))?;

    let header = job.chunk.to_wire_header(end_of_stream);
    tokio::time::timeout(settings.write_timeout, write_chunk(writer, &header, &job.payload))
        .await
        .map_err(|_| TransferError::Timeout {
            op: "relay write",
            millis: settings.write_timeout.as_millis() as u64,
        })??;
    Ok(())
}

async fn connect(addr: SocketAddr, settings: &RelaySettings) -> std::io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if settings.socket_buffer > 0 {
        socket.set_send_buffer_size(settings.socket_buffer)?;
    }
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;
    let socket = tokio::net::TcpSocket::from_std_stream(socket.into());
    socket.connect(addr).await
}

/// Turn a hop address into a socket address.
///
/// Accepts `ip:port`, `[v6]:port`, a bare IP (which gets `default_port`), or
/// a resolvable `host[:port]`.
pub async fn resolve(hop_address: &str, default_port: u16) -> Result<SocketAddr, TransferError> {
    let hop = hop_address.trim();
    if let Ok(addr) = hop.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = hop.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    let target = if hop.contains(':') {
        hop.to_string()
    } else {
        format!("{hop}:{default_port}")
    };
    let mut addrs = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| TransferError::Relay {
            addr: target.clone(),
            reason: e.to_string(),
        })?;
    addrs.next().ok_or_else(|| TransferError::Relay {
        addr: target.clone(),
        reason: "no addresses".into(),
    })
}

fn relay_error(addr: SocketAddr, reason: impl ToString) -> TransferError {
    TransferError::Relay {
        addr: addr.to_string(),
        reason: reason.to_string(),
    }
}
