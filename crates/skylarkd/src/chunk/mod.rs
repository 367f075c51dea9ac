//! Chunk data plane.
//!
//! Inbound relay connections are read by `receive`, chunks are driven
//! through their local lifecycle by `worker`, and outbound relay
//! connections are owned by `send`.

pub mod receive;
pub mod send;
pub mod worker;

pub use receive::ReceiveContext;
pub use send::{RelayPool, RelaySettings};
pub use worker::WorkerContext;
