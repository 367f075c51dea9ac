//! skylark-services — gateway state and storage backends.
//!
//! Everything here is runtime-agnostic state: the chunk store, the
//! object-store seam, the inbound hand-off buffer, and the control trait
//! the API is served against. Sockets and workers live in `skylarkd`.

pub mod chunk_store;
pub mod control;
pub mod inbound;
pub mod object_store;

pub use chunk_store::{ChunkRecord, ChunkSnapshot, ChunkStore, StoreError};
pub use control::{ChunkRequestQueues, ControlError, GatewayControl};
pub use inbound::{Deposit, InboundBuffer};
pub use object_store::{BucketRef, LocalObjectStore, MemoryObjectStore, ObjectStore, TransferError};
