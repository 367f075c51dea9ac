//! skylark-core — shared types, wire format, and configuration.
//! All other Skylark crates depend on this one.

pub mod chunk;
pub mod config;
pub mod wire;

pub use chunk::{Chunk, ChunkLocation, ChunkRequest, ChunkRequestHop, ChunkState, ValidationError};
pub use wire::{ProtocolError, WireProtocolHeader};
