//! Vote policy and candidate eligibility.
//!
//! Every voter applies a pure decision function to the transaction under
//! vote. The fixed authority applies stricter safety checks than regular
//! validators: it refuses any leave that would drop the active set below the
//! safety floor, and any join past the ceiling. Regular validators approve
//! leaves unconditionally (self-determination) and judge joins by candidate
//! eligibility and the set bounds.

use serde::{Deserialize, Serialize};

use crate::config::ConsensusConfig;
use crate::node::{NodeId, ValidatorNode};
use crate::transaction::TransactionType;

/// Who casts a vote in a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoterId {
    /// The fixed authority node; participates in every round.
    Authority,
    /// A current active validator.
    Validator(NodeId),
}

impl std::fmt::Display for VoterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authority => write!(f, "authority"),
            Self::Validator(id) => write!(f, "{id}"),
        }
    }
}

/// The registry facts a voter needs to decide on a transaction.
///
/// Snapshotted under the manager's lock; votes are then computed outside it.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    /// Active validator count at snapshot time.
    pub active_count: usize,
    /// The subject node, when it was still registered at snapshot time.
    pub subject: Option<ValidatorNode>,
}

/// Candidate eligibility predicate.
///
/// Certificate valid, battery and signal above their thresholds, and a zone
/// with infrastructure reach. Enforced at every promotion call site, not only
/// at registration: `MeshOnly` nodes stay out even during shortage-driven
/// auto-promotion.
#[must_use]
pub fn is_eligible_candidate(node: &ValidatorNode, config: &ConsensusConfig) -> bool {
    node.cert_valid
        && node.battery > config.battery_threshold
        && node.signal_dbm > config.enter_signal_threshold
        && node.zone.has_infrastructure()
}

/// Promotion score for best-candidate selection.
///
/// `signal/-50 + battery + performance (+ 0.2 dual-radio bonus)`. Only ever
/// evaluated for candidates that already passed [`is_eligible_candidate`].
#[must_use]
pub fn promotion_score(node: &ValidatorNode, config: &ConsensusConfig) -> f64 {
    let mut score = node.signal_dbm / -50.0 + node.battery + node.performance_score;
    if config.prefer_dual_radio && node.dual_radio {
        score += 0.2;
    }
    score
}

/// Compute one voter's decision on a transaction.
#[must_use]
pub fn cast_vote(
    voter: VoterId,
    tx_type: TransactionType,
    ctx: &PolicyContext,
    config: &ConsensusConfig,
) -> bool {
    match voter {
        VoterId::Authority => authority_vote(tx_type, ctx, config),
        VoterId::Validator(_) => validator_vote(tx_type, ctx, config),
    }
}

fn authority_vote(tx_type: TransactionType, ctx: &PolicyContext, config: &ConsensusConfig) -> bool {
    match tx_type {
        // Safety floor: never drop below the minimum
        TransactionType::Leave => {
            ctx.active_count.saturating_sub(1) >= config.min_validators
        }
        TransactionType::Join => {
            let eligible = ctx
                .subject
                .as_ref()
                .is_some_and(|node| is_eligible_candidate(node, config));
            eligible && ctx.active_count < config.max_validators
        }
        TransactionType::Vote | TransactionType::Promote => true,
    }
}

fn validator_vote(tx_type: TransactionType, ctx: &PolicyContext, config: &ConsensusConfig) -> bool {
    match tx_type {
        // Self-determination: a validator may always leave
        TransactionType::Leave => true,
        TransactionType::Join => {
            if ctx.active_count < config.min_validators {
                true
            } else if ctx.active_count >= config.max_validators {
                false
            } else {
                ctx.subject
                    .as_ref()
                    .is_some_and(|node| is_eligible_candidate(node, config))
            }
        }
        TransactionType::Vote | TransactionType::Promote => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Zone;

    fn eligible_node(id: u64) -> ValidatorNode {
        ValidatorNode::new(NodeId(id), Zone::TowerCoverage, -60.0, 0.9, true, false)
    }

    fn ctx(active_count: usize, subject: Option<ValidatorNode>) -> PolicyContext {
        PolicyContext {
            active_count,
            subject,
        }
    }

    #[test]
    fn eligibility_requires_all_conditions() {
        let config = ConsensusConfig::default();

        assert!(is_eligible_candidate(&eligible_node(1), &config));

        let mut bad_cert = eligible_node(2);
        bad_cert.cert_valid = false;
        assert!(!is_eligible_candidate(&bad_cert, &config));

        let mut low_battery = eligible_node(3);
        low_battery.battery = 0.1;
        assert!(!is_eligible_candidate(&low_battery, &config));

        let mut weak = eligible_node(4);
        weak.signal_dbm = -90.0;
        assert!(!is_eligible_candidate(&weak, &config));

        let mut mesh = eligible_node(5);
        mesh.zone = Zone::MeshOnly;
        assert!(!is_eligible_candidate(&mesh, &config));
    }

    #[test]
    fn authority_enforces_safety_floor() {
        let config = ConsensusConfig::default().with_validator_bounds(3, 7);

        // 4 active: dropping to 3 keeps the floor
        assert!(authority_vote(TransactionType::Leave, &ctx(4, None), &config));
        // 3 active: dropping to 2 breaks it
        assert!(!authority_vote(TransactionType::Leave, &ctx(3, None), &config));
        // 0 active: saturating, still rejected
        assert!(!authority_vote(TransactionType::Leave, &ctx(0, None), &config));
    }

    #[test]
    fn authority_caps_joins_at_maximum() {
        let config = ConsensusConfig::default().with_validator_bounds(3, 7);
        let subject = Some(eligible_node(1));

        assert!(authority_vote(TransactionType::Join, &ctx(6, subject.clone()), &config));
        assert!(!authority_vote(TransactionType::Join, &ctx(7, subject), &config));
        // Missing subject: already resolved elsewhere, reject
        assert!(!authority_vote(TransactionType::Join, &ctx(4, None), &config));
    }

    #[test]
    fn validators_always_approve_leaves() {
        let config = ConsensusConfig::default();
        assert!(validator_vote(TransactionType::Leave, &ctx(3, None), &config));
        assert!(validator_vote(TransactionType::Leave, &ctx(0, None), &config));
    }

    #[test]
    fn validator_join_vote_depends_on_bounds() {
        let config = ConsensusConfig::default().with_validator_bounds(3, 7);
        let subject = Some(eligible_node(1));

        // Below minimum: unconditional approve
        assert!(validator_vote(TransactionType::Join, &ctx(2, None), &config));
        // At/above maximum: unconditional reject
        assert!(!validator_vote(TransactionType::Join, &ctx(7, subject.clone()), &config));
        // In between: eligibility decides
        assert!(validator_vote(TransactionType::Join, &ctx(5, subject), &config));
        let mut mesh = eligible_node(2);
        mesh.zone = Zone::MeshOnly;
        assert!(!validator_vote(TransactionType::Join, &ctx(5, Some(mesh)), &config));
    }

    #[test]
    fn dual_radio_bonus_is_gated_on_preference() {
        let mut node = eligible_node(1);
        node.dual_radio = true;

        let prefer = ConsensusConfig::default();
        let mut indifferent = ConsensusConfig::default();
        indifferent.prefer_dual_radio = false;

        let with_bonus = promotion_score(&node, &prefer);
        let without = promotion_score(&node, &indifferent);
        assert!((with_bonus - without - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn score_orders_by_signal_and_battery() {
        let config = ConsensusConfig::default();

        let strong = eligible_node(1); // -60 dBm, 0.9 battery
        let mut weak = eligible_node(2);
        weak.signal_dbm = -74.0;
        weak.battery = 0.4;

        assert!(promotion_score(&strong, &config) > promotion_score(&weak, &config));
    }
}
