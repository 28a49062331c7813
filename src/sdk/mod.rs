//! High-level entry point combining the hub client with its supervisor.
//!
//! Documented guarantees on [`Gateway`] are what outer layers (HTTP handlers,
//! health checks) may rely on.
pub mod gateway;

pub use gateway::{Gateway, LinkStatus};
