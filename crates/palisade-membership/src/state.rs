//! Shared mutable protocol state, guarded by the manager's lock.

use std::collections::HashMap;

use palisade_consensus::{
    ConsensusRound, NodeId, RoundId, TransactionType, TxId, ValidatorTransaction,
};

use crate::registry::MembershipRegistry;
use crate::stats::ConsensusMetrics;

/// Everything the lock protects: the registry, the pending transaction set,
/// the open rounds, and the counters. Passed by reference into the factory,
/// round engine, and heartbeat functions rather than living as module state.
#[derive(Debug)]
pub(crate) struct ProtocolState {
    pub registry: MembershipRegistry,
    pub pending: HashMap<TxId, ValidatorTransaction>,
    pub rounds: HashMap<RoundId, ConsensusRound>,
    pub metrics: ConsensusMetrics,
    /// Digest of the last committed membership; chained into transactions.
    pub last_state_hash: String,
    /// Active count as of the last settled heartbeat tick. Registration
    /// fast-track decisions read this snapshot rather than the live count,
    /// so every registration in a burst between ticks sees the same
    /// shortage - a burst can overshoot the minimum.
    pub shortage_baseline: usize,
    next_tx: u64,
    next_round: u64,
}

impl ProtocolState {
    pub fn new() -> Self {
        let registry = MembershipRegistry::new();
        let last_state_hash = registry.state_digest();
        Self {
            registry,
            pending: HashMap::new(),
            rounds: HashMap::new(),
            metrics: ConsensusMetrics::default(),
            last_state_hash,
            shortage_baseline: 0,
            next_tx: 0,
            next_round: 0,
        }
    }

    /// Re-snapshot the active count for fast-track decisions. Called at the
    /// end of every heartbeat tick.
    pub fn refresh_shortage_baseline(&mut self) {
        self.shortage_baseline = self.registry.active_count();
    }

    pub fn next_tx_id(&mut self) -> TxId {
        self.next_tx += 1;
        TxId(self.next_tx)
    }

    pub fn next_round_id(&mut self) -> RoundId {
        self.next_round += 1;
        RoundId(self.next_round)
    }

    /// Voter population for quorum: active validators plus the authority.
    pub fn total_voters(&self) -> usize {
        self.registry.active_count() + 1
    }

    /// Whether the node already has a Join or Leave intent in flight.
    ///
    /// Central duplicate-round guard: every transaction creation path
    /// consults this, so a node never has two open membership rounds.
    pub fn has_open_membership_intent(&self, id: NodeId) -> bool {
        self.pending.values().any(|tx| {
            tx.subject == id
                && matches!(tx.tx_type, TransactionType::Join | TransactionType::Leave)
        })
    }

    /// Whether any join intent is in flight (promotion already under way).
    pub fn has_open_join_intent(&self) -> bool {
        self.pending
            .values()
            .any(|tx| tx.tx_type == TransactionType::Join)
    }

    /// Fold the new membership into the chain-link digest and count the
    /// change. Called on every applied join or leave.
    pub fn commit_membership_change(&mut self) {
        self.last_state_hash = self.registry.state_digest();
        self.metrics.validator_changes += 1;
    }
}
