//! Transaction factory: builds signed-intent records from current telemetry.
//!
//! Pure functions of registry state. A leave transaction marks its subject
//! `Leaving` immediately so duplicate leave triggers are suppressed before
//! the round ever finalizes; a join transaction marks its subject `Joining`.
//! Neither starts a round itself - the caller decides (normal flow opens a
//! round, the shortage fast-track approves directly).

use serde_json::json;
use tracing::{debug, info};

use palisade_consensus::{
    LeaveReason, NodeId, NodeStatus, TransactionType, TxId, ValidatorTransaction,
};

use crate::state::ProtocolState;

/// Build a leave transaction for an active validator and add it to the
/// pending set. No-op (returns `None`) when the node is not active, is
/// already `Leaving`, or has another membership intent in flight.
pub(crate) fn create_leave_transaction(
    state: &mut ProtocolState,
    node_id: NodeId,
    reason: LeaveReason,
) -> Option<TxId> {
    let node = state.registry.get_active(node_id)?;
    if node.status == NodeStatus::Leaving {
        debug!(node = %node_id, "leave already in flight, trigger ignored");
        return None;
    }
    let (signal_dbm, battery, zone) = (node.signal_dbm, node.battery, node.zone);
    if state.has_open_membership_intent(node_id) {
        debug!(node = %node_id, "membership intent already open, leave trigger ignored");
        return None;
    }

    let payload = json!({
        "reason": reason,
        "signal_dbm": signal_dbm,
        "battery": battery,
        "zone": zone,
    });
    let tx_id = state.next_tx_id();
    let tx = ValidatorTransaction::new(
        tx_id,
        TransactionType::Leave,
        node_id,
        state.last_state_hash.clone(),
        payload,
    );
    state.pending.insert(tx_id, tx);
    if let Some(node) = state.registry.get_live_mut(node_id) {
        node.status = NodeStatus::Leaving;
    }
    state.metrics.leave_tx_total += 1;
    info!(node = %node_id, %reason, %tx_id, "leave transaction created");
    Some(tx_id)
}

/// Build a join transaction for a candidate and add it to the pending set.
/// No-op when the node is not a candidate or already has an intent in flight.
pub(crate) fn create_join_transaction(state: &mut ProtocolState, node_id: NodeId) -> Option<TxId> {
    let node = state.registry.get_candidate(node_id)?;
    if state.has_open_membership_intent(node_id) {
        debug!(node = %node_id, "membership intent already open, join request ignored");
        return None;
    }
    let payload = json!({
        "zone": node.zone,
        "signal_dbm": node.signal_dbm,
        "battery": node.battery,
        "dual_radio": node.dual_radio,
        "cert_valid": node.cert_valid,
        "tower_chain_key": node.tower_chain_key,
        "mesh_chain_key": node.mesh_chain_key,
    });

    let tx_id = state.next_tx_id();
    let tx = ValidatorTransaction::new(
        tx_id,
        TransactionType::Join,
        node_id,
        state.last_state_hash.clone(),
        payload,
    );
    state.pending.insert(tx_id, tx);
    if let Some(node) = state.registry.get_candidate_mut(node_id) {
        node.status = NodeStatus::Joining;
    }
    state.metrics.join_tx_total += 1;
    info!(node = %node_id, %tx_id, "join transaction created");
    Some(tx_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_consensus::{ValidatorNode, Zone};

    fn state_with_validator(id: u64) -> ProtocolState {
        let mut state = ProtocolState::new();
        let node = ValidatorNode::new(NodeId(id), Zone::TowerCoverage, -60.0, 0.9, true, false);
        state.registry.insert_candidate(node);
        state.registry.promote(NodeId(id));
        state
    }

    #[test]
    fn leave_marks_node_leaving_immediately() {
        let mut state = state_with_validator(1);

        let tx_id = create_leave_transaction(&mut state, NodeId(1), LeaveReason::WeakSignal)
            .expect("leave tx");

        let node = state.registry.get_active(NodeId(1)).unwrap();
        assert_eq!(node.status, NodeStatus::Leaving);

        let tx = state.pending.get(&tx_id).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Leave);
        assert_eq!(tx.payload["reason"], "weak_signal");
        assert_eq!(tx.prev_state_hash, state.last_state_hash);
    }

    #[test]
    fn second_leave_trigger_is_a_noop() {
        let mut state = state_with_validator(1);

        let first = create_leave_transaction(&mut state, NodeId(1), LeaveReason::WeakSignal);
        assert!(first.is_some());
        let second =
            create_leave_transaction(&mut state, NodeId(1), LeaveReason::EnteredMeshZone);
        assert!(second.is_none());

        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.metrics.leave_tx_total, 1);
    }

    #[test]
    fn leave_requires_active_validator() {
        let mut state = ProtocolState::new();
        let node = ValidatorNode::new(NodeId(5), Zone::TowerCoverage, -60.0, 0.9, true, false);
        state.registry.insert_candidate(node);

        assert!(create_leave_transaction(&mut state, NodeId(5), LeaveReason::LowBattery).is_none());
        assert!(create_leave_transaction(&mut state, NodeId(99), LeaveReason::LowBattery).is_none());
    }

    #[test]
    fn join_captures_telemetry_snapshot() {
        let mut state = ProtocolState::new();
        let node = ValidatorNode::new(NodeId(3), Zone::BridgeCoverage, -70.0, 0.8, true, true);
        state.registry.insert_candidate(node);

        let tx_id = create_join_transaction(&mut state, NodeId(3)).expect("join tx");
        let tx = state.pending.get(&tx_id).unwrap();

        assert_eq!(tx.tx_type, TransactionType::Join);
        assert_eq!(tx.payload["dual_radio"], true);
        assert_eq!(tx.payload["tower_chain_key"], "tower:n3");
        assert_eq!(
            state.registry.get_candidate(NodeId(3)).unwrap().status,
            NodeStatus::Joining
        );
        assert_eq!(state.metrics.join_tx_total, 1);
    }

    #[test]
    fn duplicate_join_intent_suppressed() {
        let mut state = ProtocolState::new();
        let node = ValidatorNode::new(NodeId(3), Zone::BridgeCoverage, -70.0, 0.8, true, false);
        state.registry.insert_candidate(node);

        assert!(create_join_transaction(&mut state, NodeId(3)).is_some());
        assert!(create_join_transaction(&mut state, NodeId(3)).is_none());
        assert_eq!(state.pending.len(), 1);
    }
}
