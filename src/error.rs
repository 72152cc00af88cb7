//! Crate-wide error type
//!
//! The analytics core itself is infallible by design (under-populated
//! windows fall back to configured floors); errors only arise at the
//! edges: configuration, state persistence, and event-time violations.

use thiserror::Error;

/// Errors produced by the radar core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file/env could not be loaded or deserialized
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Filesystem failure while writing or rotating a state checkpoint
    #[error("persistence I/O error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Snapshot could not be serialized
    #[error("snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// A tick arrived with an event timestamp earlier than one already
    /// processed; accepting it would corrupt every rolling window
    #[error("event timestamp regressed: {last_ms} -> {incoming_ms}")]
    TimestampRegression { last_ms: u64, incoming_ms: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
