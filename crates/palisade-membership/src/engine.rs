//! Consensus round driver: vote fan-out, write-back, and finalization.
//!
//! Vote collection follows a snapshot-then-commit pattern. Under the lock we
//! snapshot the round's phase, the voter list, and the policy inputs into a
//! [`VoteRequest`]; the fan-out over the voters runs outside the lock; the
//! write-back re-acquires it and re-validates that the round still exists and
//! is still in the snapshotted phase. A round that has meanwhile been
//! resolved or advanced means "already resolved", never an error.

use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use palisade_consensus::{
    advance, cast_vote, is_eligible_candidate, ConsensusConfig, ConsensusRound, LeaveReason,
    NodeId, NodeStatus, Phase, PolicyContext, RoundId, RoundStep, TransactionType, TxId,
    ValidatorTransaction, VoterId,
};

use crate::factory;
use crate::state::ProtocolState;

/// Snapshot of everything needed to compute one phase's votes outside the
/// lock.
#[derive(Debug, Clone)]
pub(crate) struct VoteRequest {
    pub round_id: RoundId,
    pub phase: Phase,
    pub tx_type: TransactionType,
    pub voters: Vec<VoterId>,
    pub ctx: PolicyContext,
}

/// Open a round for a pending transaction and snapshot its first vote
/// request. Returns `None` when the transaction has meanwhile disappeared.
pub(crate) fn open_round(
    state: &mut ProtocolState,
    config: &ConsensusConfig,
    tx_id: TxId,
) -> Option<VoteRequest> {
    if !state.pending.contains_key(&tx_id) {
        return None;
    }
    let round_id = state.next_round_id();
    let round = ConsensusRound::new(round_id, tx_id, config.vote_timeout);
    debug!(%round_id, %tx_id, timeout = ?config.vote_timeout, "consensus round opened");
    state.rounds.insert(round_id, round);
    vote_request(state, round_id)
}

/// Snapshot the vote request for a round's current phase.
pub(crate) fn vote_request(state: &ProtocolState, round_id: RoundId) -> Option<VoteRequest> {
    let round = state.rounds.get(&round_id)?;
    let tx = state.pending.get(&round.tx_id)?;

    let mut voters: Vec<VoterId> = state
        .registry
        .active_ids()
        .into_iter()
        .map(VoterId::Validator)
        .collect();
    voters.push(VoterId::Authority);

    Some(VoteRequest {
        round_id,
        phase: round.phase,
        tx_type: tx.tx_type,
        voters,
        ctx: PolicyContext {
            active_count: state.registry.active_count(),
            subject: state.registry.get(tx.subject).cloned(),
        },
    })
}

/// Fan the vote request out to every voter. Pure; runs outside the lock.
pub(crate) fn collect_votes(
    request: &VoteRequest,
    config: &ConsensusConfig,
) -> Vec<(VoterId, bool)> {
    request
        .voters
        .iter()
        .map(|voter| (*voter, cast_vote(*voter, request.tx_type, &request.ctx, config)))
        .collect()
}

/// Write collected votes back into the round, re-validating that it still
/// exists and has not advanced past the snapshotted phase.
pub(crate) fn record_votes(
    state: &mut ProtocolState,
    round_id: RoundId,
    phase: Phase,
    votes: Vec<(VoterId, bool)>,
) {
    let Some(round) = state.rounds.get_mut(&round_id) else {
        debug!(%round_id, "vote write-back for an already resolved round dropped");
        return;
    };
    if round.phase != phase {
        debug!(%round_id, snapshot = %phase, current = %round.phase, "round advanced during fan-out, votes dropped");
        return;
    }
    for (voter, approve) in &votes {
        round.record_vote(phase, *voter, *approve);
    }
    let tx_id = round.tx_id;
    if let Some(tx) = state.pending.get_mut(&tx_id) {
        for (voter, approve) in votes {
            tx.votes.insert(voter, approve);
        }
    }
}

/// Compute votes outside the lock, then write them back under it.
pub(crate) async fn dispatch(
    state: &Mutex<ProtocolState>,
    config: &ConsensusConfig,
    request: VoteRequest,
) {
    let votes = collect_votes(&request, config);
    let mut guard = state.lock().await;
    record_votes(&mut guard, request.round_id, request.phase, votes);
}

/// Step every open round once. Returns the commit-phase vote requests to
/// re-broadcast after the lock is released.
pub(crate) fn advance_rounds(
    state: &mut ProtocolState,
    config: &ConsensusConfig,
    now: Instant,
) -> Vec<VoteRequest> {
    let mut rebroadcasts = Vec::new();
    let mut ids: Vec<RoundId> = state.rounds.keys().copied().collect();
    ids.sort_unstable();

    for round_id in ids {
        let Some(round) = state.rounds.get(&round_id) else {
            continue;
        };
        // Earlier finalizations in this pass may have changed the count
        let total_voters = state.total_voters();
        match advance(round, total_voters, config.consensus_threshold, now) {
            RoundStep::Pending => {}
            RoundStep::Expired => fail_round(state, round_id, "timeout"),
            RoundStep::Failed => fail_round(state, round_id, "quorum not reached"),
            RoundStep::EnterCommit => {
                if let Some(round) = state.rounds.get_mut(&round_id) {
                    round.enter_commit();
                    debug!(%round_id, "prepare quorum reached, entering commit");
                }
                if let Some(request) = vote_request(state, round_id) {
                    rebroadcasts.push(request);
                }
            }
            RoundStep::Finalize => finalize_round(state, round_id),
        }
    }
    rebroadcasts
}

/// Drop a round that timed out or missed quorum. The transaction is removed
/// and its subject released so the node can re-attempt with a fresh
/// transaction later.
pub(crate) fn fail_round(state: &mut ProtocolState, round_id: RoundId, cause: &str) {
    let Some(round) = state.rounds.remove(&round_id) else {
        return;
    };
    state.metrics.failed_consensus += 1;
    if let Some(tx) = state.pending.remove(&round.tx_id) {
        warn!(%round_id, tx = %tx.id, subject = %tx.subject, cause, "consensus round failed");
        release_subject(state, &tx);
    } else {
        warn!(%round_id, cause, "consensus round failed, transaction already gone");
    }
}

/// Revert a subject's in-flight status after its transaction is dropped.
pub(crate) fn release_subject(state: &mut ProtocolState, tx: &ValidatorTransaction) {
    let Some(node) = state.registry.get_live_mut(tx.subject) else {
        return;
    };
    match tx.tx_type {
        TransactionType::Leave if node.status == NodeStatus::Leaving => {
            node.status = NodeStatus::Active;
        }
        TransactionType::Join if node.status == NodeStatus::Joining => {
            node.status = NodeStatus::Candidate;
        }
        _ => {}
    }
}

/// Finalize a round that reached commit quorum and apply its transaction.
pub(crate) fn finalize_round(state: &mut ProtocolState, round_id: RoundId) {
    let Some(mut round) = state.rounds.remove(&round_id) else {
        return;
    };
    round.finalize();
    state.metrics.record_consensus_time(round.started_at.elapsed());
    debug!(%round_id, tx = %round.tx_id, "commit quorum reached, round finalized");

    let Some(mut tx) = state.pending.remove(&round.tx_id) else {
        debug!(%round_id, "finalized round's transaction already resolved");
        return;
    };
    tx.finalized = true;
    apply_transaction(state, &tx);
}

/// Fast-track approval for the shortage path: apply the join without a vote.
pub(crate) fn approve_join(state: &mut ProtocolState, tx_id: TxId) {
    let Some(mut tx) = state.pending.remove(&tx_id) else {
        return;
    };
    tx.finalized = true;
    debug!(subject = %tx.subject, "join fast-tracked below minimum, vote bypassed");
    apply_transaction(state, &tx);
}

fn apply_transaction(state: &mut ProtocolState, tx: &ValidatorTransaction) {
    match tx.tx_type {
        TransactionType::Leave => apply_leave(state, tx),
        TransactionType::Join => apply_join(state, tx),
        // Record-keeping types carry no membership effect
        TransactionType::Vote | TransactionType::Promote => {}
    }
}

fn apply_leave(state: &mut ProtocolState, tx: &ValidatorTransaction) {
    if state.registry.retire(tx.subject) {
        info!(subject = %tx.subject, "validator retired by consensus");
        state.commit_membership_change();
        // A set now below minimum is refilled by the heartbeat's
        // best-candidate promotion pass.
    } else {
        debug!(subject = %tx.subject, "leave finalized for a node no longer active");
    }
}

fn apply_join(state: &mut ProtocolState, tx: &ValidatorTransaction) {
    let Some(node) = state.registry.get_candidate_mut(tx.subject) else {
        debug!(subject = %tx.subject, "join finalized for a node no longer a candidate");
        return;
    };
    node.status = NodeStatus::Approved;
    if state.registry.promote(tx.subject) {
        state.metrics.promotions += 1;
        state.commit_membership_change();
        info!(subject = %tx.subject, "candidate promoted to validator");
    }
}

/// Forced-leave entry point shared by the telemetry triggers and the
/// heartbeat monitor. Idempotent for nodes already `Leaving`.
pub(crate) fn initiate_forced_leave(
    state: &mut ProtocolState,
    config: &ConsensusConfig,
    node_id: NodeId,
    reason: LeaveReason,
) -> Option<VoteRequest> {
    let tx_id = factory::create_leave_transaction(state, node_id, reason)?;
    open_round(state, config, tx_id)
}

/// Fast-track an eligible candidate straight into the active set, bypassing
/// the vote. The shortage decision is the caller's; eligibility and the
/// hard ceiling are still enforced here against the live count, so
/// `MeshOnly` nodes stay out and the set never exceeds the maximum.
pub(crate) fn fast_track_candidate(
    state: &mut ProtocolState,
    config: &ConsensusConfig,
    node_id: NodeId,
) -> bool {
    let Some(node) = state.registry.get_candidate(node_id) else {
        return false;
    };
    if !is_eligible_candidate(node, config) {
        return false;
    }
    if state.registry.active_count() >= config.max_validators {
        return false;
    }
    let Some(tx_id) = factory::create_join_transaction(state, node_id) else {
        return false;
    };
    approve_join(state, tx_id);
    true
}

/// Re-check a candidate for promotion. Below the minimum this fast-tracks
/// the join (bypassing the vote, exactly once per candidate); otherwise it
/// opens a normal join round. Eligibility is enforced here, at the call
/// site, so `MeshOnly` nodes stay out even under shortage.
pub(crate) fn try_promote_candidate(
    state: &mut ProtocolState,
    config: &ConsensusConfig,
    node_id: NodeId,
) -> Option<VoteRequest> {
    let node = state.registry.get_candidate(node_id)?;
    if !is_eligible_candidate(node, config) {
        return None;
    }
    let active = state.registry.active_count();
    if active >= config.max_validators {
        return None;
    }
    if active < config.min_validators {
        fast_track_candidate(state, config, node_id);
        None
    } else {
        let tx_id = factory::create_join_transaction(state, node_id)?;
        open_round(state, config, tx_id)
    }
}
