//! Chunk workers — run the forwarding algorithm for each registered chunk.
//!
//! The dispatcher drains the intake queue and runs every chunk on its own
//! task, bounded by a semaphore. A worker owns a chunk only through the
//! store's compare-and-set claims, so a chunk queued twice is processed once.
//!
//! Per chunk:
//!   1. head hop `src_object_store` → ranged GET; `relay` → wait for the
//!      payload from the upstream gateway.
//!   2. pop the head hop.
//!   3. empty path → local sink bucket; `dst_object_store` → ranged PUT;
//!      `relay` → hand to the relay sender for that address.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Semaphore};

use skylark_core::{ChunkLocation, ChunkRequest, ChunkState};
use skylark_services::{BucketRef, ChunkStore, InboundBuffer, ObjectStore, StoreError, TransferError};

use super::send::RelayPool;

#[derive(Clone)]
pub struct WorkerContext {
    pub store: ChunkStore,
    pub objects: Arc<dyn ObjectStore>,
    pub inbound: InboundBuffer,
    pub relay: RelayPool,
    pub hop_timeout: Duration,
    /// Where chunks whose path ends at this gateway are written.
    pub local_sink: BucketRef,
}

/// Runs until shutdown or until every queue sender is dropped.
pub async fn run_dispatcher(
    ctx: WorkerContext,
    mut queue: mpsc::UnboundedReceiver<u64>,
    workers: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    tracing::info!(workers, "chunk dispatcher started");

    loop {
        let chunk_id = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("chunk dispatcher shutting down");
                return;
            }
            next = queue.recv() => match next {
                Some(id) => id,
                None => return,
            },
        };

        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            process_chunk(&ctx, chunk_id).await;
            drop(permit);
        });
    }
}

/// Drive one chunk as far as this gateway takes it. Returns the state the
/// chunk was left in.
pub async fn process_chunk(ctx: &WorkerContext, chunk_id: u64) -> ChunkState {
    match forward(ctx, chunk_id).await {
        Ok(()) => {
            tracing::info!(chunk_id, "chunk upload complete");
            ChunkState::UploadComplete
        }
        Err(ForwardError::NotClaimed(e)) => {
            // Someone else owns it, or it is already done. Leave it alone.
            tracing::debug!(chunk_id, error = %e, "chunk not claimed");
            ctx.store.get_state(chunk_id).unwrap_or(ChunkState::Failed)
        }
        Err(ForwardError::Store(e @ StoreError::InvalidTransition { .. })) => {
            tracing::error!(chunk_id, error = %e, "chunk state fault");
            mark_failed(ctx, chunk_id)
        }
        Err(e) => {
            tracing::warn!(chunk_id, error = %e, "chunk failed");
            mark_failed(ctx, chunk_id)
        }
    }
}

fn mark_failed(ctx: &WorkerContext, chunk_id: u64) -> ChunkState {
    match ctx.store.set_state(chunk_id, ChunkState::Failed) {
        Ok(_) => ChunkState::Failed,
        Err(e) => {
            tracing::error!(chunk_id, error = %e, "could not mark chunk failed");
            ctx.store.get_state(chunk_id).unwrap_or(ChunkState::Failed)
        }
    }
}

async fn forward(ctx: &WorkerContext, chunk_id: u64) -> Result<(), ForwardError> {
    use ChunkState::*;

    let request = ctx
        .store
        .get_request(chunk_id)
        .ok_or(ForwardError::NotClaimed(StoreError::NotFound(chunk_id)))?;
    ctx.store
        .claim(chunk_id, Registered, DownloadInProgress)
        .map_err(ForwardError::NotClaimed)?;

    let payload = download(ctx, &request).await?;
    ctx.store.claim(chunk_id, DownloadInProgress, Downloaded)?;

    let request = ctx.store.advance_path(chunk_id)?;
    ctx.store.claim(chunk_id, Downloaded, UploadInProgress)?;

    upload(ctx, &request, payload).await?;
    ctx.store.claim(chunk_id, UploadInProgress, UploadComplete)?;
    Ok(())
}

async fn download(ctx: &WorkerContext, request: &ChunkRequest) -> Result<Bytes, ForwardError> {
    let chunk = &request.chunk;
    let head = request.head().ok_or(ForwardError::EmptyPath(chunk.chunk_id))?;

    let payload = match &head.location {
        ChunkLocation::SrcObjectStore { region, bucket } => {
            let bucket = BucketRef::new(region, bucket);
            timed(
                "object store download",
                ctx.hop_timeout,
                ctx.objects.get_range(
                    &bucket,
                    &chunk.key,
                    chunk.file_offset_bytes,
                    chunk.chunk_length_bytes,
                ),
            )
            .await?
        }
        ChunkLocation::Relay => ctx.inbound.wait(chunk.chunk_id, ctx.hop_timeout).await?,
        ChunkLocation::DstObjectStore { .. } => {
            return Err(ForwardError::MisplacedHop {
                chunk_id: chunk.chunk_id,
                hop: head.location.name(),
            })
        }
    };

    let actual = payload.len() as u64;
    if actual != chunk.chunk_length_bytes {
        return Err(TransferError::SizeMismatch {
            chunk_id: chunk.chunk_id,
            expected: chunk.chunk_length_bytes,
            actual,
        }
        .into());
    }
    tracing::debug!(chunk_id = chunk.chunk_id, source = head.location.name(), bytes = actual, "chunk downloaded");
    Ok(payload)
}

async fn upload(ctx: &WorkerContext, request: &ChunkRequest, payload: Bytes) -> Result<(), ForwardError> {
    let chunk = &request.chunk;
    let put = |bucket: BucketRef, payload: Bytes| async move {
        timed(
            "object store upload",
            ctx.hop_timeout,
            ctx.objects
                .put_range(&bucket, &chunk.key, chunk.file_offset_bytes, payload),
        )
        .await
    };

    match request.head() {
        None => put(ctx.local_sink.clone(), payload).await?,
        Some(hop) => match &hop.location {
            ChunkLocation::DstObjectStore { region, bucket } => {
                put(BucketRef::new(region, bucket), payload).await?
            }
            ChunkLocation::Relay => {
                ctx.relay
                    .send(&hop.hop_ip_address, chunk.clone(), payload)
                    .await?
            }
            ChunkLocation::SrcObjectStore { .. } => {
                return Err(ForwardError::MisplacedHop {
                    chunk_id: chunk.chunk_id,
                    hop: hop.location.name(),
                })
            }
        },
    }
    Ok(())
}

async fn timed<T>(
    op: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, TransferError>>,
) -> Result<T, TransferError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransferError::Timeout {
            op,
            millis: limit.as_millis() as u64,
        })?
}

#[derive(Debug, thiserror::Error)]
enum ForwardError {
    #[error("not claimable: {0}")]
    NotClaimed(StoreError),

    #[error("chunk {0} has an empty path")]
    EmptyPath(u64),

    #[error("chunk {chunk_id}: unexpected {hop} hop")]
    MisplacedHop { chunk_id: u64, hop: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}
