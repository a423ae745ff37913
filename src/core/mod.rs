//! In-memory action log.

/// Ordered action log with an applied-position pointer.
pub mod log;
