//! Validator membership runtime for a mobile mesh/cellular hybrid network.
//!
//! Composes the pure consensus primitives from `palisade-consensus` into a
//! running protocol: a membership registry, a transaction factory, a round
//! engine, a heartbeat monitor task, and the [`ValidatorManager`] façade
//! that the surrounding simulator and routing layers talk to.
//!
//! All protocol state lives behind one `tokio` mutex owned by the manager.
//! Vote fan-outs are computed outside the lock from a snapshot and written
//! back under it with re-validation, so a round that resolved mid-flight
//! simply drops the stale votes.

mod engine;
mod error;
mod factory;
mod heartbeat;
mod manager;
mod registry;
mod state;
mod stats;

pub use error::{Error, Result};
pub use manager::{NodeRegistration, TelemetryUpdate, ValidatorManager};
pub use stats::{ConsensusStats, MetricsSnapshot};

pub use palisade_consensus::{
    ConfigError, ConsensusConfig, LeaveReason, NodeId, NodeStatus, ValidatorNode, Zone,
};
