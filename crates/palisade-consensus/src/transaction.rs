//! Signed-intent records for membership changes.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::node::NodeId;
use crate::policy::VoterId;

/// Unique transaction identifier, allocated by the manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Kind of membership transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// A validator requests (or is forced) to leave the active set.
    Leave,
    /// A candidate requests to join the active set.
    Join,
    /// A standalone vote record.
    Vote,
    /// A shortage promotion record.
    Promote,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leave => write!(f, "leave"),
            Self::Join => write!(f, "join"),
            Self::Vote => write!(f, "vote"),
            Self::Promote => write!(f, "promote"),
        }
    }
}

/// Why a validator is being asked to leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// Signal toward the authority dropped below the node's leave threshold.
    WeakSignal,
    /// The node moved into a `MeshOnly` zone.
    EnteredMeshZone,
    /// Battery fell below the configured floor.
    LowBattery,
    /// No telemetry update within the inactivity window.
    Inactive,
    /// Tenure exceeded the rotation interval.
    Rotation,
}

impl LeaveReason {
    /// The snake_case wire name, as recorded in transaction payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WeakSignal => "weak_signal",
            Self::EnteredMeshZone => "entered_mesh_zone",
            Self::LowBattery => "low_battery",
            Self::Inactive => "inactive",
            Self::Rotation => "rotation",
        }
    }
}

impl std::fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A membership-change intent under (or awaiting) vote.
///
/// Once finalized a transaction is immutable and removed from the pending set.
#[derive(Debug, Clone)]
pub struct ValidatorTransaction {
    pub id: TxId,
    pub tx_type: TransactionType,
    /// The node whose membership is being decided.
    pub subject: NodeId,
    /// Creation time, unix milliseconds.
    pub timestamp_ms: u64,
    /// Hex blake3 digest of the previously committed membership state.
    pub prev_state_hash: String,
    /// Signature placeholder; vote authentication is out of scope.
    pub signature: Option<[u8; 64]>,
    /// Telemetry snapshot at creation time.
    pub payload: serde_json::Value,
    /// Per-voter decisions mirrored from the owning round's current phase.
    pub votes: HashMap<VoterId, bool>,
    pub finalized: bool,
    /// Creation instant, for stale-transaction cleanup.
    pub created_at: Instant,
}

impl ValidatorTransaction {
    /// Build a new unfinalized transaction.
    #[must_use]
    pub fn new(
        id: TxId,
        tx_type: TransactionType,
        subject: NodeId,
        prev_state_hash: String,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            tx_type,
            subject,
            timestamp_ms: unix_millis(),
            prev_state_hash,
            signature: None,
            payload,
            votes: HashMap::new(),
            finalized: false,
            created_at: Instant::now(),
        }
    }
}

/// Current wall-clock time as unix milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leave_reason_wire_names() {
        assert_eq!(LeaveReason::WeakSignal.as_str(), "weak_signal");
        assert_eq!(LeaveReason::EnteredMeshZone.as_str(), "entered_mesh_zone");
        assert_eq!(
            serde_json::to_value(LeaveReason::LowBattery).unwrap(),
            json!("low_battery")
        );
    }

    #[test]
    fn new_transaction_is_unfinalized() {
        let tx = ValidatorTransaction::new(
            TxId(1),
            TransactionType::Leave,
            NodeId(9),
            "00".repeat(32),
            json!({ "reason": "weak_signal" }),
        );

        assert!(!tx.finalized);
        assert!(tx.votes.is_empty());
        assert!(tx.signature.is_none());
        assert!(tx.timestamp_ms > 0);
    }
}
