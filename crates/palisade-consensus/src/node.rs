//! Validator node identity, coverage zone, and telemetry.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Unique node identifier, assigned by the surrounding mobility simulator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Coarse connectivity class of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    /// Direct tower coverage.
    TowerCoverage,
    /// Extended coverage through a bridge node.
    BridgeCoverage,
    /// No infrastructure reachable; mesh links only.
    MeshOnly,
}

impl Zone {
    /// Whether the zone can reach the authority without mesh relaying.
    ///
    /// `MeshOnly` nodes are never eligible for the validator set, even during
    /// shortage-driven auto-promotion.
    #[must_use]
    pub const fn has_infrastructure(self) -> bool {
        !matches!(self, Zone::MeshOnly)
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TowerCoverage => write!(f, "tower_coverage"),
            Self::BridgeCoverage => write!(f, "bridge_coverage"),
            Self::MeshOnly => write!(f, "mesh_only"),
        }
    }
}

/// Lifecycle status of a node within the membership registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Voting member of the validator set.
    Active,
    /// Leave transaction in flight; duplicate leave triggers are suppressed.
    Leaving,
    /// Removed from the validator set; kept as the audit trail.
    Retired,
    /// Registered and awaiting promotion.
    Candidate,
    /// Join transaction in flight.
    Joining,
    /// Join quorum reached; about to move into the active set.
    Approved,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Leaving => write!(f, "leaving"),
            Self::Retired => write!(f, "retired"),
            Self::Candidate => write!(f, "candidate"),
            Self::Joining => write!(f, "joining"),
            Self::Approved => write!(f, "approved"),
        }
    }
}

/// A node tracked by the membership registry.
///
/// The registry is the single owner of every `ValidatorNode`; the transaction
/// factory and round engine only reference nodes by id. A node belongs to
/// exactly one of the active / candidate / retired collections at a time.
#[derive(Debug, Clone)]
pub struct ValidatorNode {
    pub id: NodeId,
    pub zone: Zone,
    pub status: NodeStatus,

    /// Signal strength toward the fixed authority, dBm.
    pub signal_dbm: f64,
    /// Battery fraction in [0, 1].
    pub battery: f64,
    /// Certificate validity flag (authentication itself is out of scope).
    pub cert_valid: bool,
    /// Last telemetry update; inactivity is judged against this.
    pub last_activity: Instant,

    /// When the node was last promoted into the active set.
    pub validator_since: Option<Instant>,
    /// Whether the node can hold tower and mesh radios simultaneously.
    pub dual_radio: bool,
    /// Placeholder public-key identifier on the tower chain.
    pub tower_chain_key: String,
    /// Placeholder public-key identifier on the mesh chain.
    pub mesh_chain_key: String,
    /// Per-node leave threshold (dBm); the global threshold applies when unset.
    pub leave_signal_override: Option<f64>,
    /// Normalized performance score in [0, 1].
    pub performance_score: f64,
}

impl ValidatorNode {
    /// Create a fresh candidate from registration telemetry.
    #[must_use]
    pub fn new(
        id: NodeId,
        zone: Zone,
        signal_dbm: f64,
        battery: f64,
        cert_valid: bool,
        dual_radio: bool,
    ) -> Self {
        Self {
            id,
            zone,
            status: NodeStatus::Candidate,
            signal_dbm,
            battery,
            cert_valid,
            last_activity: Instant::now(),
            validator_since: None,
            dual_radio,
            tower_chain_key: format!("tower:{id}"),
            mesh_chain_key: format!("mesh:{id}"),
            leave_signal_override: None,
            performance_score: 0.5,
        }
    }

    /// The leave threshold this node is held to.
    #[must_use]
    pub fn leave_threshold(&self, global: f64) -> f64 {
        self.leave_signal_override.unwrap_or(global)
    }

    /// Record a telemetry update.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether the node is in the active validator set.
    ///
    /// `Leaving` nodes still vote until their leave round finalizes.
    #[must_use]
    pub fn is_validator(&self) -> bool {
        matches!(self.status, NodeStatus::Active | NodeStatus::Leaving)
    }
}
