//! Persistence worker, its wire protocol, and the client used by the engine.

/// Correlating client with timeouts and a readiness gate.
pub mod client;
/// Worker and client tuning.
pub mod config;
/// Request and response messages.
pub mod protocol;
/// Background task that owns the durable store.
pub mod worker;
