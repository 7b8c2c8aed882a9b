//! Error types for the validator manager.
//!
//! Only lifecycle control can fail with an error. Everything else in the
//! protocol absorbs failure locally: rejected registrations return `false`,
//! failed rounds become a metric increment, stale references mean "already
//! resolved". Callers treat those as normal control flow.

use std::time::Duration;

use thiserror::Error;

use palisade_consensus::ConfigError;

/// Result type for manager lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the validator manager lifecycle.
#[derive(Debug, Error)]
pub enum Error {
    /// Manager constructed with an internally inconsistent config
    #[error("invalid configuration")]
    InvalidConfig(#[from] ConfigError),

    /// Start called while the heartbeat monitor is already running
    #[error("heartbeat monitor already running")]
    AlreadyRunning,

    /// Stop called while the heartbeat monitor is not running
    #[error("heartbeat monitor not running")]
    NotRunning,

    /// The monitor task did not exit within the bounded wait
    #[error("heartbeat monitor did not shut down within {0:?}")]
    ShutdownTimeout(Duration),

    /// The monitor task panicked or was cancelled externally
    #[error("heartbeat monitor task failed: {0}")]
    MonitorFailed(String),
}
