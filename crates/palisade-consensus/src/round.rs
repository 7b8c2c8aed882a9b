//! Two-phase consensus round state machine.
//!
//! A round owns one membership transaction and walks it through
//! `Prepare → Commit → Finalized`. Each phase needs
//! `quorum = ceil(total_voters × threshold)` approvals; a round that misses
//! quorum after every voter has spoken, or whose absolute deadline passes,
//! fails and is dropped. Phase transitions are monotonic - no phase ever
//! reverts - and `Finalized` is terminal.
//!
//! Deadlines are checked lazily when the heartbeat monitor steps the round,
//! never by per-round timers, so real expiry latency is bounded by the
//! heartbeat interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::policy::VoterId;
use crate::transaction::TxId;

/// Unique round identifier, allocated by the manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RoundId(pub u64);

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "round{}", self.0)
    }
}

/// Phase of a consensus round. A round is in exactly one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Prepare,
    Commit,
    Finalized,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Commit => write!(f, "commit"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// One two-phase vote over a single membership transaction.
#[derive(Debug, Clone)]
pub struct ConsensusRound {
    pub id: RoundId,
    /// The transaction under vote; the pending set owns the record itself.
    pub tx_id: TxId,
    pub prepare_votes: HashMap<VoterId, bool>,
    pub commit_votes: HashMap<VoterId, bool>,
    pub phase: Phase,
    /// Absolute deadline, fixed at creation.
    pub deadline: Instant,
    /// Creation instant, for the consensus-time metric.
    pub started_at: Instant,
    pub success: bool,
}

impl ConsensusRound {
    /// Open a new round in `Prepare` with empty vote maps.
    #[must_use]
    pub fn new(id: RoundId, tx_id: TxId, vote_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx_id,
            prepare_votes: HashMap::new(),
            commit_votes: HashMap::new(),
            phase: Phase::Prepare,
            deadline: now + vote_timeout,
            started_at: now,
            success: false,
        }
    }

    /// The vote map of the current phase.
    #[must_use]
    pub fn current_votes(&self) -> &HashMap<VoterId, bool> {
        match self.phase {
            Phase::Prepare => &self.prepare_votes,
            Phase::Commit | Phase::Finalized => &self.commit_votes,
        }
    }

    /// Record a vote for `phase`. Returns false (and drops the vote) when the
    /// round has meanwhile advanced past that phase - the guard for votes
    /// computed outside the lock.
    pub fn record_vote(&mut self, phase: Phase, voter: VoterId, approve: bool) -> bool {
        if phase != self.phase {
            return false;
        }
        match self.phase {
            Phase::Prepare => {
                self.prepare_votes.insert(voter, approve);
                true
            }
            Phase::Commit => {
                self.commit_votes.insert(voter, approve);
                true
            }
            Phase::Finalized => false,
        }
    }

    /// Transition `Prepare → Commit`, clearing the commit vote map.
    pub fn enter_commit(&mut self) {
        debug_assert_eq!(self.phase, Phase::Prepare);
        self.phase = Phase::Commit;
        self.commit_votes.clear();
    }

    /// Terminal transition into `Finalized` with success.
    pub fn finalize(&mut self) {
        self.phase = Phase::Finalized;
        self.success = true;
    }
}

/// Quorum for a phase: `ceil(total_voters × threshold)`.
#[must_use]
pub fn quorum(total_voters: usize, threshold: f64) -> usize {
    (total_voters as f64 * threshold).ceil() as usize
}

/// Outcome of one advance step over an open round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStep {
    /// Deadline passed before quorum; drop the round.
    Expired,
    /// Votes still outstanding in the current phase.
    Pending,
    /// Prepare quorum reached; enter commit and re-broadcast.
    EnterCommit,
    /// Commit quorum reached; apply the transaction.
    Finalize,
    /// Every voter has voted and approvals fell short; drop the round.
    Failed,
}

/// Step a round once against the current voter population.
///
/// Pure: the caller applies the resulting transition. `total_voters` is the
/// active validator count plus one for the authority.
#[must_use]
pub fn advance(
    round: &ConsensusRound,
    total_voters: usize,
    threshold: f64,
    now: Instant,
) -> RoundStep {
    if now > round.deadline {
        return RoundStep::Expired;
    }
    if round.phase == Phase::Finalized {
        // Terminal rounds leave the open set immediately; nothing to do if
        // one is stepped anyway.
        return RoundStep::Pending;
    }

    let needed = quorum(total_voters, threshold);
    let votes = round.current_votes();
    let approvals = votes.values().filter(|approve| **approve).count();

    if approvals >= needed {
        match round.phase {
            Phase::Prepare => RoundStep::EnterCommit,
            Phase::Commit => RoundStep::Finalize,
            Phase::Finalized => RoundStep::Pending,
        }
    } else if votes.len() >= total_voters {
        RoundStep::Failed
    } else {
        RoundStep::Pending
    }
}
