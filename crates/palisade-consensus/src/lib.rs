//! Consensus-Based Validator Membership
//!
//! Mobile nodes in the Palisade mesh/cellular hybrid drift between coverage
//! zones, drain their batteries, and fall silent. The validator set that signs
//! cross-zone transactions therefore cannot be static: nodes request to join
//! or leave it, and every change is accepted only after a two-phase
//! (prepare/commit) vote reaches quorum among the current validators plus the
//! fixed authority node.
//!
//! # Quorum
//!
//! Every round counts the authority as one voter on top of the active
//! validators:
//!
//! ```text
//! quorum = ceil(total_voters × consensus_threshold)
//! ```
//!
//! With the default threshold of 0.67 the authority alone can finalize a round
//! when no validators exist yet - bootstrap is authority-trusted, a mature set
//! outvotes any single node.
//!
//! # What lives here
//!
//! This crate is the synchronous core: the data model ([`ValidatorNode`],
//! [`ValidatorTransaction`], [`ConsensusRound`]), the round step function
//! ([`advance`]), the vote policy ([`cast_vote`]) and candidate eligibility.
//! The lock, the heartbeat monitor, and the manager façade live in
//! `palisade-membership`.

mod config;
mod node;
mod policy;
mod round;
mod transaction;

pub use config::{ConfigError, ConsensusConfig};
pub use node::{NodeId, NodeStatus, ValidatorNode, Zone};
pub use policy::{cast_vote, is_eligible_candidate, promotion_score, PolicyContext, VoterId};
pub use round::{advance, quorum, ConsensusRound, Phase, RoundId, RoundStep};
pub use transaction::{unix_millis, LeaveReason, TransactionType, TxId, ValidatorTransaction};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_matches_reference_table() {
        // threshold 0.67, voters = active validators + authority
        assert_eq!(quorum(1, 0.67), 1); // authority alone
        assert_eq!(quorum(2, 0.67), 2);
        assert_eq!(quorum(3, 0.67), 3);
        assert_eq!(quorum(4, 0.67), 3);
        assert_eq!(quorum(5, 0.67), 4);
        assert_eq!(quorum(8, 0.67), 6);
    }
}
