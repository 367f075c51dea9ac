//! Chunk store — the authoritative per-gateway table of chunk state.
//!
//! One row per chunk id, holding the current [`ChunkState`] next to the
//! (possibly already forwarded) [`ChunkRequest`]. State *is* the queue: the
//! pending/downloaded/uploaded views are derived by scanning rows, never kept
//! in a second structure that could drift.
//!
//! Rows live in a `DashMap`. Every operation on one id runs under that row's
//! shard lock, so single-id operations are linearizable while unrelated ids
//! only contend when they share a shard.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use skylark_core::{ChunkRequest, ChunkState};

/// Full local history of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub request: ChunkRequest,
    pub state: ChunkState,
    /// Unix ms when the request was registered.
    pub registered_at: u64,
    /// Unix ms of the last state change or path advance.
    pub updated_at: u64,
}

/// Point-in-time view of a row, as served by the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub chunk_id: u64,
    pub key: String,
    pub state: ChunkState,
    pub file_offset_bytes: u64,
    pub chunk_length_bytes: u64,
    /// `chunk_location_type` of the current head hop, if any.
    pub next_hop: Option<String>,
    pub remaining_hops: usize,
    pub registered_at: u64,
    pub updated_at: u64,
}

impl ChunkSnapshot {
    fn of(record: &ChunkRecord) -> Self {
        let chunk = &record.request.chunk;
        Self {
            chunk_id: chunk.chunk_id,
            key: chunk.key.clone(),
            state: record.state,
            file_offset_bytes: chunk.file_offset_bytes,
            chunk_length_bytes: chunk.chunk_length_bytes,
            next_hop: record.request.head().map(|h| h.location.name().to_string()),
            remaining_hops: record.request.path.len(),
            registered_at: record.registered_at,
            updated_at: record.updated_at,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Concurrency-safe chunk table. Cheap to clone; clones share rows.
#[derive(Clone, Default)]
pub struct ChunkStore {
    rows: Arc<DashMap<u64, ChunkRecord>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
        }
    }

    /// Register a request in `registered` state.
    ///
    /// Chunk ids must be unique for the transfer job; a reused id is
    /// rejected and the existing row is left untouched.
    pub fn put(&self, request: ChunkRequest) -> Result<(), StoreError> {
        let chunk_id = request.chunk_id();
        match self.rows.entry(chunk_id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(chunk_id)),
            Entry::Vacant(slot) => {
                let now = now_ms();
                slot.insert(ChunkRecord {
                    request,
                    state: ChunkState::Registered,
                    registered_at: now,
                    updated_at: now,
                });
                Ok(())
            }
        }
    }

    /// Register a batch, rejecting it whole if any id is already present or
    /// repeated within the batch.
    pub fn put_batch(&self, requests: Vec<ChunkRequest>) -> Result<(), StoreError> {
        let mut seen = std::collections::HashSet::with_capacity(requests.len());
        for request in &requests {
            let id = request.chunk_id();
            if !seen.insert(id) || self.rows.contains_key(&id) {
                return Err(StoreError::Duplicate(id));
            }
        }
        // The scan above is advisory; a concurrent batch can still take an id
        // first, so undo our own inserts if any put loses.
        let mut inserted = Vec::with_capacity(requests.len());
        for request in requests {
            let id = request.chunk_id();
            if let Err(e) = self.put(request) {
                self.withdraw(&inserted);
                return Err(e);
            }
            inserted.push(id);
        }
        Ok(())
    }

    /// Drop rows that are still `registered`, i.e. never picked up by a
    /// worker. Returns how many were removed.
    pub fn withdraw(&self, chunk_ids: &[u64]) -> usize {
        chunk_ids
            .iter()
            .filter(|&&id| {
                self.rows
                    .remove_if(&id, |_, row| row.state == ChunkState::Registered)
                    .is_some()
            })
            .count()
    }

    pub fn contains(&self, chunk_id: u64) -> bool {
        self.rows.contains_key(&chunk_id)
    }

    pub fn get_state(&self, chunk_id: u64) -> Result<ChunkState, StoreError> {
        self.rows
            .get(&chunk_id)
            .map(|row| row.state)
            .ok_or(StoreError::NotFound(chunk_id))
    }

    /// Move a row to `next` along a legal edge. Returns the previous state.
    ///
    /// An illegal edge fails with `InvalidTransition` and leaves the row as it was.
    pub fn set_state(&self, chunk_id: u64, next: ChunkState) -> Result<ChunkState, StoreError> {
        let mut row = self
            .rows
            .get_mut(&chunk_id)
            .ok_or(StoreError::NotFound(chunk_id))?;
        let from = row.state;
        if !from.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                chunk_id,
                from,
                to: next,
            });
        }
        row.state = next;
        row.updated_at = now_ms();
        Ok(from)
    }

    /// Compare-and-set: move `expected -> next` only if the row is currently
    /// in `expected`.
    ///
    /// This is how a worker takes ownership of a phase. When several workers
    /// race on one id, exactly one claim succeeds.
    pub fn claim(
        &self,
        chunk_id: u64,
        expected: ChunkState,
        next: ChunkState,
    ) -> Result<(), StoreError> {
        let mut row = self
            .rows
            .get_mut(&chunk_id)
            .ok_or(StoreError::NotFound(chunk_id))?;
        if row.state != expected || !expected.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                chunk_id,
                from: row.state,
                to: next,
            });
        }
        row.state = next;
        row.updated_at = now_ms();
        Ok(())
    }

    /// Chunk ids currently in `state`, ascending.
    pub fn list_by_state(&self, state: ChunkState) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .rows
            .iter()
            .filter(|row| row.state == state)
            .map(|row| *row.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn get_request(&self, chunk_id: u64) -> Option<ChunkRequest> {
        self.rows.get(&chunk_id).map(|row| row.request.clone())
    }

    /// Pop the head hop of the stored request and return the updated request.
    pub fn advance_path(&self, chunk_id: u64) -> Result<ChunkRequest, StoreError> {
        let mut row = self
            .rows
            .get_mut(&chunk_id)
            .ok_or(StoreError::NotFound(chunk_id))?;
        row.request.pop_hop();
        row.updated_at = now_ms();
        Ok(row.request.clone())
    }

    pub fn snapshot(&self, chunk_id: u64) -> Option<ChunkSnapshot> {
        self.rows.get(&chunk_id).map(|row| ChunkSnapshot::of(&row))
    }

    /// Every row, ordered by chunk id.
    pub fn snapshots(&self) -> Vec<ChunkSnapshot> {
        let mut all: Vec<ChunkSnapshot> = self.rows.iter().map(|row| ChunkSnapshot::of(&row)).collect();
        all.sort_unstable_by_key(|s| s.chunk_id);
        all
    }

    /// Administrative cleanup. Only terminal rows may be removed; rows still
    /// owned by a worker are refused.
    pub fn remove(&self, chunk_id: u64) -> Result<ChunkRecord, StoreError> {
        match self.rows.entry(chunk_id) {
            Entry::Vacant(_) => Err(StoreError::NotFound(chunk_id)),
            Entry::Occupied(row) if !row.get().state.is_terminal() => Err(StoreError::InFlight {
                chunk_id,
                state: row.get().state,
            }),
            Entry::Occupied(row) => Ok(row.remove()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("chunk {0} is already registered")]
    Duplicate(u64),

    #[error("chunk {0} not found")]
    NotFound(u64),

    #[error("chunk {chunk_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        chunk_id: u64,
        from: ChunkState,
        to: ChunkState,
    },

    #[error("chunk {chunk_id} is still in flight ({state})")]
    InFlight { chunk_id: u64, state: ChunkState },
}
