//! Heartbeat monitor: the protocol's single periodic driver.
//!
//! Each tick performs, in order:
//!
//! 1. **Monitor validators** - scan a snapshot of the active set for
//!    inactivity, low battery, or rotation due; queue at most one
//!    forced-leave per tick to bound churn.
//! 2. **Advance rounds** - step every open round; expiry is detected here,
//!    so real timeout latency is bounded by the heartbeat interval.
//! 3. **Cleanup** - drop pending transactions older than the vote timeout
//!    that never reached a round.
//! 4. **Best-candidate promotion** - while the active set is below minimum
//!    and no promotion is in flight, open a join round for the
//!    highest-scoring eligible candidate.
//!
//! The tick ends by re-snapshotting the shortage baseline that registration
//! fast-track decisions read. Vote fan-outs queued by any phase run after
//! the lock is released.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::debug;

use palisade_consensus::{
    is_eligible_candidate, promotion_score, ConsensusConfig, LeaveReason, NodeId, NodeStatus,
    TxId,
};

use crate::engine::{self, VoteRequest};
use crate::factory;
use crate::state::ProtocolState;

/// Run one full heartbeat pass over the shared state.
pub(crate) async fn run_tick(state: &Mutex<ProtocolState>, config: &ConsensusConfig) {
    let now = Instant::now();
    let mut broadcasts = Vec::new();
    {
        let mut guard = state.lock().await;
        if let Some(request) = monitor_validators(&mut guard, config, now) {
            broadcasts.push(request);
        }
        broadcasts.extend(engine::advance_rounds(&mut guard, config, now));
        cleanup_stale(&mut guard, config, now);
        if let Some(request) = promote_best_candidate(&mut guard, config) {
            broadcasts.push(request);
        }
        guard.refresh_shortage_baseline();
    }
    for request in broadcasts {
        engine::dispatch(state, config, request).await;
    }
}

/// Scan the active set for forced-leave conditions. At most one remediation
/// per tick.
pub(crate) fn monitor_validators(
    state: &mut ProtocolState,
    config: &ConsensusConfig,
    now: Instant,
) -> Option<VoteRequest> {
    let inactivity_window = config.heartbeat_interval * 3;
    let can_rotate = config.rotation_enabled
        && state.registry.active_count() > config.min_validators
        && state
            .registry
            .candidate_nodes()
            .any(|candidate| is_eligible_candidate(candidate, config));

    let mut snapshot: Vec<(NodeId, NodeStatus, Instant, f64, Option<Instant>)> = state
        .registry
        .active_nodes()
        .map(|node| {
            (
                node.id,
                node.status,
                node.last_activity,
                node.battery,
                node.validator_since,
            )
        })
        .collect();
    snapshot.sort_unstable_by_key(|(id, ..)| *id);

    for (id, status, last_activity, battery, since) in snapshot {
        if status == NodeStatus::Leaving {
            continue;
        }
        let reason = if now.duration_since(last_activity) > inactivity_window {
            LeaveReason::Inactive
        } else if battery < config.battery_threshold {
            LeaveReason::LowBattery
        } else if can_rotate
            && since.is_some_and(|start| now.duration_since(start) > config.rotation_interval)
        {
            LeaveReason::Rotation
        } else {
            continue;
        };
        return engine::initiate_forced_leave(state, config, id, reason);
    }
    None
}

/// Drop pending transactions older than the vote timeout that never reached
/// a round. Defensive: every current creation path opens a round or approves
/// immediately.
pub(crate) fn cleanup_stale(state: &mut ProtocolState, config: &ConsensusConfig, now: Instant) {
    let in_round: HashSet<TxId> = state.rounds.values().map(|round| round.tx_id).collect();
    let stale: Vec<TxId> = state
        .pending
        .iter()
        .filter(|(tx_id, tx)| {
            !in_round.contains(tx_id)
                && now.duration_since(tx.created_at) > config.vote_timeout
        })
        .map(|(tx_id, _)| *tx_id)
        .collect();

    for tx_id in stale {
        if let Some(tx) = state.pending.remove(&tx_id) {
            debug!(%tx_id, subject = %tx.subject, "stale pending transaction without a round dropped");
            engine::release_subject(state, &tx);
        }
    }
}

/// Refill the active set when it is below minimum: score every eligible
/// candidate and open a join round for the best one, unless a promotion is
/// already in flight.
pub(crate) fn promote_best_candidate(
    state: &mut ProtocolState,
    config: &ConsensusConfig,
) -> Option<VoteRequest> {
    if state.registry.active_count() >= config.min_validators {
        return None;
    }
    if state.has_open_join_intent() {
        return None;
    }

    // Score is only evaluated for candidates that passed eligibility,
    // so MeshOnly or drained nodes are skipped outright.
    let best = state
        .registry
        .candidate_nodes()
        .filter(|node| is_eligible_candidate(node, config))
        .max_by(|a, b| {
            promotion_score(a, config)
                .partial_cmp(&promotion_score(b, config))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|node| node.id)?;

    debug!(candidate = %best, "best-candidate promotion under validator shortage");
    let tx_id = factory::create_join_transaction(state, best)?;
    engine::open_round(state, config, tx_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_consensus::{TransactionType, ValidatorNode, Zone};
    use std::time::Duration;

    fn eligible(id: u64) -> ValidatorNode {
        ValidatorNode::new(NodeId(id), Zone::TowerCoverage, -60.0, 0.9, true, false)
    }

    fn state_with_validators(count: u64) -> ProtocolState {
        let mut state = ProtocolState::new();
        for id in 1..=count {
            state.registry.insert_candidate(eligible(id));
            state.registry.promote(NodeId(id));
        }
        state
    }

    #[test]
    fn low_battery_triggers_single_remediation() {
        let config = ConsensusConfig::default();
        let mut state = state_with_validators(4);
        // Two drained validators, but churn is bounded to one leave per tick
        state.registry.get_live_mut(NodeId(1)).unwrap().battery = 0.05;
        state.registry.get_live_mut(NodeId(2)).unwrap().battery = 0.05;

        let request = monitor_validators(&mut state, &config, Instant::now());
        assert!(request.is_some());
        assert_eq!(state.metrics.leave_tx_total, 1);
        assert_eq!(
            state.registry.get_active(NodeId(1)).unwrap().status,
            NodeStatus::Leaving
        );
        assert_eq!(
            state.registry.get_active(NodeId(2)).unwrap().status,
            NodeStatus::Active
        );
    }

    #[test]
    fn inactivity_detected_after_three_intervals() {
        let config = ConsensusConfig::default();
        let mut state = state_with_validators(4);

        let stale = Instant::now() - config.heartbeat_interval * 4;
        state.registry.get_live_mut(NodeId(3)).unwrap().last_activity = stale;

        monitor_validators(&mut state, &config, Instant::now());
        let tx = state.pending.values().next().expect("leave tx");
        assert_eq!(tx.subject, NodeId(3));
        assert_eq!(tx.payload["reason"], "inactive");
    }

    #[test]
    fn healthy_set_needs_no_remediation() {
        let config = ConsensusConfig::default();
        let mut state = state_with_validators(4);
        assert!(monitor_validators(&mut state, &config, Instant::now()).is_none());
        assert_eq!(state.metrics.leave_tx_total, 0);
    }

    #[test]
    fn rotation_requires_slack_and_replacement() {
        let config = ConsensusConfig::default().with_rotation(Duration::from_secs(60));
        let mut state = state_with_validators(4);
        let old = Instant::now() - Duration::from_secs(120);
        state.registry.get_live_mut(NodeId(1)).unwrap().validator_since = Some(old);

        // No eligible candidate waiting: rotation holds off
        assert!(monitor_validators(&mut state, &config, Instant::now()).is_none());

        state.registry.insert_candidate(eligible(9));
        let request = monitor_validators(&mut state, &config, Instant::now());
        assert!(request.is_some());
        let tx = state.pending.values().next().expect("leave tx");
        assert_eq!(tx.payload["reason"], "rotation");
    }

    #[test]
    fn rotation_never_breaks_the_floor() {
        let config = ConsensusConfig::default()
            .with_validator_bounds(3, 7)
            .with_rotation(Duration::from_secs(60));
        let mut state = state_with_validators(3);
        let old = Instant::now() - Duration::from_secs(120);
        state.registry.get_live_mut(NodeId(1)).unwrap().validator_since = Some(old);
        state.registry.insert_candidate(eligible(9));

        // active == min: rotating out would require dropping below the floor
        assert!(monitor_validators(&mut state, &config, Instant::now()).is_none());
    }

    #[test]
    fn stale_roundless_transaction_expired() {
        let config = ConsensusConfig::default();
        let mut state = state_with_validators(3);
        state.registry.insert_candidate(eligible(9));

        let tx_id = factory::create_join_transaction(&mut state, NodeId(9)).expect("join tx");
        let past = Instant::now() - config.vote_timeout * 2;
        state.pending.get_mut(&tx_id).unwrap().created_at = past;

        cleanup_stale(&mut state, &config, Instant::now());

        assert!(state.pending.is_empty());
        assert_eq!(
            state.registry.get_candidate(NodeId(9)).unwrap().status,
            NodeStatus::Candidate
        );
    }

    #[test]
    fn cleanup_spares_transactions_with_rounds() {
        let config = ConsensusConfig::default();
        let mut state = state_with_validators(4);

        let request =
            engine::initiate_forced_leave(&mut state, &config, NodeId(1), LeaveReason::WeakSignal)
                .expect("round opened");
        let past = Instant::now() - config.vote_timeout * 2;
        state
            .pending
            .values_mut()
            .for_each(|tx| tx.created_at = past);

        cleanup_stale(&mut state, &config, Instant::now());
        assert_eq!(state.pending.len(), 1);
        assert!(state.rounds.contains_key(&request.round_id));
    }

    #[test]
    fn best_candidate_wins_promotion_round() {
        let config = ConsensusConfig::default().with_validator_bounds(3, 7);
        let mut state = state_with_validators(2);

        state.registry.insert_candidate(eligible(10)); // -60 dBm, 0.9
        let mut weaker = eligible(11);
        weaker.signal_dbm = -74.0;
        weaker.battery = 0.5;
        state.registry.insert_candidate(weaker);

        let request = promote_best_candidate(&mut state, &config).expect("join round");
        assert_eq!(request.tx_type, TransactionType::Join);
        let tx = state.pending.values().next().unwrap();
        assert_eq!(tx.subject, NodeId(10));
    }

    #[test]
    fn ineligible_candidates_never_scored() {
        let config = ConsensusConfig::default().with_validator_bounds(3, 7);
        let mut state = state_with_validators(2);

        // Would score highest, but its zone excludes it outright
        let mut mesh = eligible(10);
        mesh.zone = Zone::MeshOnly;
        mesh.battery = 0.1;
        state.registry.insert_candidate(mesh);

        let mut modest = eligible(11);
        modest.signal_dbm = -70.0;
        state.registry.insert_candidate(modest);

        promote_best_candidate(&mut state, &config).expect("join round");
        let tx = state.pending.values().next().unwrap();
        assert_eq!(tx.subject, NodeId(11));
    }

    #[test]
    fn one_promotion_in_flight_at_a_time() {
        let config = ConsensusConfig::default().with_validator_bounds(3, 7);
        let mut state = state_with_validators(2);
        state.registry.insert_candidate(eligible(10));
        state.registry.insert_candidate(eligible(11));

        assert!(promote_best_candidate(&mut state, &config).is_some());
        assert!(promote_best_candidate(&mut state, &config).is_none());
        assert_eq!(state.metrics.join_tx_total, 1);
    }

    #[test]
    fn no_promotion_at_or_above_minimum() {
        let config = ConsensusConfig::default().with_validator_bounds(3, 7);
        let mut state = state_with_validators(3);
        state.registry.insert_candidate(eligible(10));

        assert!(promote_best_candidate(&mut state, &config).is_none());
    }
}
