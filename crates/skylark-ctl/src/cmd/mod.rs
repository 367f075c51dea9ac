//! CLI command modules.

pub mod chunks;
pub mod http;
pub mod requests;
pub mod servers;
