//! skylarkd — the Skylark gateway daemon.
//!
//! The binary wires configuration, storage, and the control API around a
//! [`Gateway`]; the library half lets tests run gateways in-process.

pub mod chunk;
pub mod gateway;
pub mod server;

pub use gateway::Gateway;
