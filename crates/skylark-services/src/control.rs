//! The surface a gateway exposes to its control API.
//!
//! The HTTP layer only sees this trait, so it can be served against the real
//! gateway or against a stub in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use skylark_core::{ChunkRequest, ChunkState, ValidationError};

use crate::chunk_store::{ChunkSnapshot, ChunkStore, StoreError};

/// Chunk ids grouped by where they are in their local lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequestQueues {
    /// Registered, or held by a worker mid-download or mid-upload.
    pub pending: Vec<u64>,
    pub downloaded: Vec<u64>,
    pub uploaded: Vec<u64>,
    pub failed: Vec<u64>,
}

impl ChunkRequestQueues {
    pub fn from_store(store: &ChunkStore) -> Self {
        let mut queues = Self::default();
        for snap in store.snapshots() {
            let bucket = match snap.state {
                s if s.is_pending() => &mut queues.pending,
                ChunkState::Downloaded => &mut queues.downloaded,
                ChunkState::UploadComplete => &mut queues.uploaded,
                _ => &mut queues.failed,
            };
            bucket.push(snap.chunk_id);
        }
        queues
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("no chunk server on port {0}")]
    PortNotFound(u16),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to start chunk server: {0}")]
    Bind(#[source] std::io::Error),

    #[error("gateway is shutting down")]
    ShuttingDown,
}

#[async_trait]
pub trait GatewayControl: Send + Sync {
    /// Ports of the running chunk servers, ascending.
    fn server_ports(&self) -> Vec<u16>;

    /// Start one more chunk server on an ephemeral port.
    async fn start_server(&self) -> Result<u16, ControlError>;

    /// Stop the chunk server on `port`. In-flight connections may finish.
    async fn stop_server(&self, port: u16) -> Result<(), ControlError>;

    /// Register requests and queue them for work. All-or-nothing.
    fn add_chunk_requests(&self, requests: Vec<ChunkRequest>) -> Result<(), ControlError>;

    fn add_chunk_request(&self, request: ChunkRequest) -> Result<(), ControlError> {
        self.add_chunk_requests(vec![request])
    }

    fn chunks(&self) -> Vec<ChunkSnapshot>;

    fn chunk(&self, chunk_id: u64) -> Option<ChunkSnapshot>;

    fn chunk_requests(&self) -> ChunkRequestQueues;

    fn chunk_request(&self, chunk_id: u64) -> Option<ChunkRequest>;

    /// Forget a terminal chunk.
    fn remove_chunk(&self, chunk_id: u64) -> Result<(), ControlError>;
}
