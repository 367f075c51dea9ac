use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

use skylark_core::wire::{read_header, read_payload};
use skylark_core::{ChunkState, ProtocolError, WireProtocolHeader};
use skylark_services::{ChunkStore, Deposit, InboundBuffer};

const READ_BUFFER: usize = 256 * 1024;

/// What a connection handler needs from the gateway.
#[derive(Clone)]
pub struct ReceiveContext {
    pub store: ChunkStore,
    pub inbound: InboundBuffer,
    pub idle_timeout: Duration,
    pub max_chunk_bytes: u64,
}

/// Read framed chunks from one relay connection until `end_of_stream`.
///
/// Each payload is handed to the inbound buffer, where the worker owning the
/// chunk picks it up. Any framing error ends this connection and nothing
/// else, as does a payload the buffer has no room for. Returns the number of
/// chunks received.
pub async fn receive_loop(stream: TcpStream, peer: SocketAddr, ctx: ReceiveContext) -> Result<u64> {
    let mut reader = BufReader::with_capacity(READ_BUFFER, stream);
    let mut received = 0u64;

    loop {
        let header = match tokio::time::timeout(ctx.idle_timeout, next_header(&mut reader)).await {
            Ok(Ok(Some(h))) => h,
            // Peer hung up between frames without signalling end of stream.
            Ok(Ok(None)) => {
                tracing::debug!(%peer, received, "connection closed before end_of_stream");
                return Ok(received);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => bail!(
                "no header from {peer} for {}s, closing",
                ctx.idle_timeout.as_secs()
            ),
        };

        let payload = match tokio::time::timeout(
            ctx.idle_timeout,
            read_payload(&mut reader, header.chunk_len, ctx.max_chunk_bytes),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => bail!(
                "payload for chunk {} from {peer} stalled, closing",
                header.chunk_id
            ),
        };
        received += 1;

        let state = ctx.store.get_state(header.chunk_id).ok();
        match state {
            // Only a chunk that has not yet downloaded can still use the bytes.
            Some(s) if !matches!(s, ChunkState::Registered | ChunkState::DownloadInProgress) => {
                tracing::warn!(chunk_id = header.chunk_id, state = %s, %peer, "payload for settled chunk dropped");
            }
            _ => {
                let outcome = ctx.inbound.deposit(header.chunk_id, payload);
                tracing::debug!(
                    chunk_id = header.chunk_id,
                    bytes = header.chunk_len,
                    end_of_stream = header.end_of_stream,
                    registered = state.is_some(),
                    ?outcome,
                    %peer,
                    "chunk received"
                );
                match outcome {
                    Deposit::Rejected => bail!(
                        "no room to buffer chunk {} from {peer} ({} bytes parked), closing",
                        header.chunk_id,
                        ctx.inbound.parked_bytes()
                    ),
                    Deposit::Buffered | Deposit::Replaced if state.is_none() => {
                        tracing::info!(
                            chunk_id = header.chunk_id,
                            %peer,
                            "chunk arrived ahead of its request, buffering"
                        );
                    }
                    _ => {}
                }
            }
        }

        if header.end_of_stream {
            tracing::debug!(%peer, received, "end of stream");
            return Ok(received);
        }
    }
}

/// Next header, or `None` if the peer closed cleanly on a frame boundary.
/// A header cut short is a framing error.
async fn next_header<R>(reader: &mut R) -> Result<Option<WireProtocolHeader>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    if reader.fill_buf().await?.is_empty() {
        return Ok(None);
    }
    read_header(reader).await.map(Some)
}
