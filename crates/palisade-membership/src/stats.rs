//! Statistics surface exposed to the routing/transaction-validation layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use palisade_consensus::ConsensusConfig;

/// Running protocol counters, updated under the manager's lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConsensusMetrics {
    pub leave_tx_total: u64,
    pub join_tx_total: u64,
    pub promotions: u64,
    pub failed_consensus: u64,
    pub validator_changes: u64,
    finalized_rounds: u64,
    consensus_time_total_ms: f64,
}

impl ConsensusMetrics {
    /// Record the wall time of a successfully finalized round.
    pub fn record_consensus_time(&mut self, elapsed: Duration) {
        self.finalized_rounds += 1;
        self.consensus_time_total_ms += elapsed.as_secs_f64() * 1000.0;
    }

    /// Mean wall time of finalized rounds, milliseconds.
    pub fn avg_consensus_time_ms(&self) -> f64 {
        if self.finalized_rounds == 0 {
            0.0
        } else {
            self.consensus_time_total_ms / self.finalized_rounds as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            leave_tx_total: self.leave_tx_total,
            join_tx_total: self.join_tx_total,
            promotions: self.promotions,
            failed_consensus: self.failed_consensus,
            avg_consensus_time_ms: self.avg_consensus_time_ms(),
            validator_changes: self.validator_changes,
        }
    }
}

/// Point-in-time view of the protocol counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub leave_tx_total: u64,
    pub join_tx_total: u64,
    pub promotions: u64,
    pub failed_consensus: u64,
    pub avg_consensus_time_ms: f64,
    pub validator_changes: u64,
}

/// Full statistics record returned by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusStats {
    pub active_count: usize,
    pub candidate_count: usize,
    pub retired_count: usize,
    pub pending_tx_count: usize,
    pub open_round_count: usize,
    pub metrics: MetricsSnapshot,
    pub config: ConsensusConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_consensus_time_over_finalized_rounds() {
        let mut metrics = ConsensusMetrics::default();
        assert_eq!(metrics.avg_consensus_time_ms(), 0.0);

        metrics.record_consensus_time(Duration::from_millis(100));
        metrics.record_consensus_time(Duration::from_millis(300));

        let avg = metrics.avg_consensus_time_ms();
        assert!((avg - 200.0).abs() < 1e-6, "avg was {avg}");
    }

    #[test]
    fn stats_serialize_to_json() {
        let stats = ConsensusStats {
            active_count: 3,
            candidate_count: 1,
            retired_count: 0,
            pending_tx_count: 0,
            open_round_count: 0,
            metrics: ConsensusMetrics::default().snapshot(),
            config: ConsensusConfig::default(),
        };

        let value = serde_json::to_value(&stats).expect("stats serialize");
        assert_eq!(value["active_count"], 3);
        assert_eq!(value["metrics"]["failed_consensus"], 0);
        assert_eq!(value["config"]["min_validators"], 3);
    }
}
