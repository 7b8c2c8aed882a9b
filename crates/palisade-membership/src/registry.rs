//! Membership registry: the three node collections.
//!
//! Single owner of every [`ValidatorNode`]. A node lives in exactly one of
//! the active / candidate / retired collections at a time; retirement is the
//! only exit and the retired set doubles as the audit trail. The registry has
//! no concurrency of its own - the manager's lock guards it.

use std::collections::HashMap;
use std::time::Instant;

use palisade_consensus::{NodeId, NodeStatus, ValidatorNode};

/// The three membership collections.
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    active: HashMap<NodeId, ValidatorNode>,
    candidates: HashMap<NodeId, ValidatorNode>,
    retired: HashMap<NodeId, ValidatorNode>,
}

impl MembershipRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the node is known in any collection.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.active.contains_key(&id)
            || self.candidates.contains_key(&id)
            || self.retired.contains_key(&id)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Ids of the active validator set, sorted for deterministic iteration.
    #[must_use]
    pub fn active_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Look a node up across all three collections.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&ValidatorNode> {
        self.active
            .get(&id)
            .or_else(|| self.candidates.get(&id))
            .or_else(|| self.retired.get(&id))
    }

    /// Mutable lookup across the live collections (active + candidates).
    /// Retired nodes are immutable history.
    pub fn get_live_mut(&mut self, id: NodeId) -> Option<&mut ValidatorNode> {
        if let Some(node) = self.active.get_mut(&id) {
            return Some(node);
        }
        self.candidates.get_mut(&id)
    }

    #[must_use]
    pub fn get_active(&self, id: NodeId) -> Option<&ValidatorNode> {
        self.active.get(&id)
    }

    #[must_use]
    pub fn get_candidate(&self, id: NodeId) -> Option<&ValidatorNode> {
        self.candidates.get(&id)
    }

    pub fn get_candidate_mut(&mut self, id: NodeId) -> Option<&mut ValidatorNode> {
        self.candidates.get_mut(&id)
    }

    /// Add a new candidate. Rejects nodes already known anywhere.
    pub fn insert_candidate(&mut self, node: ValidatorNode) -> bool {
        if self.contains(node.id) {
            return false;
        }
        self.candidates.insert(node.id, node);
        true
    }

    /// Move a candidate into the active set, stamping its tenure start.
    /// Returns false when the node is not a candidate.
    pub fn promote(&mut self, id: NodeId) -> bool {
        let Some(mut node) = self.candidates.remove(&id) else {
            return false;
        };
        node.status = NodeStatus::Active;
        node.validator_since = Some(Instant::now());
        self.active.insert(id, node);
        true
    }

    /// Move an active validator into the retired set.
    /// Returns false when the node is not active.
    pub fn retire(&mut self, id: NodeId) -> bool {
        let Some(mut node) = self.active.remove(&id) else {
            return false;
        };
        node.status = NodeStatus::Retired;
        self.retired.insert(id, node);
        true
    }

    /// Iterate the active validators.
    pub fn active_nodes(&self) -> impl Iterator<Item = &ValidatorNode> {
        self.active.values()
    }

    /// Iterate the candidates.
    pub fn candidate_nodes(&self) -> impl Iterator<Item = &ValidatorNode> {
        self.candidates.values()
    }

    /// Blake3 digest of the committed membership, hex-encoded.
    ///
    /// Chains transactions together as the `prev_state_hash` placeholder.
    #[must_use]
    pub fn state_digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (label, collection) in [
            ("active", &self.active),
            ("candidates", &self.candidates),
            ("retired", &self.retired),
        ] {
            hasher.update(label.as_bytes());
            let mut ids: Vec<u64> = collection.keys().map(|id| id.0).collect();
            ids.sort_unstable();
            for id in ids {
                hasher.update(&id.to_le_bytes());
            }
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}
