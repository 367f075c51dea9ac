//! Hand-off point between chunk listeners and relay workers.
//!
//! A payload can arrive on the wire before or after the worker for its chunk
//! starts waiting. Whichever side comes second completes the hand-off:
//! a listener that finds a waiter sends the bytes straight to it, and a
//! waiter that finds bytes already parked takes them. Parked payloads that
//! nobody claims are swept after a TTL, and their total size is capped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::object_store::TransferError;

enum Slot {
    Ready { payload: Bytes, arrived: Instant },
    Waiting(oneshot::Sender<Bytes>),
}

/// What `deposit` did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deposit {
    /// Handed to a waiting worker.
    Delivered,
    /// Parked until a worker asks for it.
    Buffered,
    /// Parked, replacing an unclaimed earlier payload for the same id.
    Replaced,
    /// The waiter for this id gave up between registering and delivery.
    Discarded,
    /// Parking it would exceed the byte limit. Nothing was stored.
    Rejected,
}

#[derive(Clone)]
pub struct InboundBuffer {
    slots: Arc<DashMap<u64, Slot>>,
    parked_bytes: Arc<AtomicU64>,
    max_parked_bytes: u64,
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::with_limit(u64::MAX)
    }
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that parks at most `max_parked_bytes` of unclaimed payload.
    /// Hand-offs to a waiting worker are never counted.
    pub fn with_limit(max_parked_bytes: u64) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            parked_bytes: Arc::new(AtomicU64::new(0)),
            max_parked_bytes,
        }
    }

    /// Deliver `payload` to the worker waiting on `chunk_id`, or park it.
    pub fn deposit(&self, chunk_id: u64, payload: Bytes) -> Deposit {
        let len = payload.len() as u64;
        let parked = |payload| Slot::Ready {
            payload,
            arrived: Instant::now(),
        };
        match self.slots.entry(chunk_id) {
            Entry::Vacant(slot) => {
                if !self.reserve(len) {
                    return Deposit::Rejected;
                }
                slot.insert(parked(payload));
                Deposit::Buffered
            }
            Entry::Occupied(mut slot) => {
                let previous = match slot.get() {
                    Slot::Ready { payload, .. } => Some(payload.len() as u64),
                    Slot::Waiting(_) => None,
                };
                match previous {
                    Some(previous) => {
                        if !self.reserve(len) {
                            return Deposit::Rejected;
                        }
                        slot.insert(parked(payload));
                        self.release(previous);
                        tracing::debug!(chunk_id, "unclaimed inbound payload replaced");
                        Deposit::Replaced
                    }
                    None => match slot.remove() {
                        Slot::Waiting(tx) => match tx.send(payload) {
                            Ok(()) => Deposit::Delivered,
                            Err(_) => Deposit::Discarded,
                        },
                        Slot::Ready { .. } => Deposit::Discarded,
                    },
                }
            }
        }
    }

    /// Wait up to `timeout` for the payload of `chunk_id`.
    pub async fn wait(&self, chunk_id: u64, timeout: Duration) -> Result<Bytes, TransferError> {
        let (tx, mut rx) = oneshot::channel();
        match self.slots.entry(chunk_id) {
            Entry::Vacant(slot) => {
                slot.insert(Slot::Waiting(tx));
            }
            // A second waiter supersedes the first.
            Entry::Occupied(mut slot) => {
                if let Slot::Ready { payload, .. } = slot.insert(Slot::Waiting(tx)) {
                    slot.remove();
                    self.release(payload.len() as u64);
                    return Ok(payload);
                }
            }
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(TransferError::Abandoned(chunk_id)),
            Err(_) => {
                self.slots
                    .remove_if(&chunk_id, |_, slot| matches!(slot, Slot::Waiting(_)));
                // A deposit may have landed between the timer firing and the removal.
                match rx.try_recv() {
                    Ok(payload) => Ok(payload),
                    Err(_) => Err(TransferError::Timeout {
                        op: "inbound relay wait",
                        millis: timeout.as_millis() as u64,
                    }),
                }
            }
        }
    }

    /// Drop whatever is held for `chunk_id`. A pending waiter sees `Abandoned`.
    pub fn cancel(&self, chunk_id: u64) {
        if let Some((_, Slot::Ready { payload, .. })) = self.slots.remove(&chunk_id) {
            self.release(payload.len() as u64);
        }
    }

    /// Remove parked payloads older than `ttl` and waiters whose worker is
    /// gone. Returns how many entries were dropped.
    pub fn evict_stale(&self, ttl: Duration) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot {
            Slot::Ready { payload, arrived } => {
                let keep = arrived.elapsed() < ttl;
                if !keep {
                    self.release(payload.len() as u64);
                }
                keep
            }
            Slot::Waiting(tx) => !tx.is_closed(),
        });
        before.saturating_sub(self.slots.len())
    }

    /// Bytes currently parked without a worker to take them.
    pub fn parked_bytes(&self) -> u64 {
        self.parked_bytes.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn reserve(&self, len: u64) -> bool {
        self.parked_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_add(len).filter(|&total| total <= self.max_parked_bytes)
            })
            .is_ok()
    }

    fn release(&self, len: u64) {
        let _ = self
            .parked_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                Some(held.saturating_sub(len))
            });
    }
}
