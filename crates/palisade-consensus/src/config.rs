//! Tunable parameters of the membership protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration surface of the validator membership protocol.
///
/// Every field has a default and can be overridden at construction via the
/// `with_*` builders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Signal floor (dBm) below which an active validator is forced to leave.
    /// Individual nodes may carry a stricter per-node override.
    pub leave_signal_threshold: f64,

    /// Signal level (dBm) a candidate must exceed to be considered for
    /// promotion.
    pub enter_signal_threshold: f64,

    /// Minimum battery fraction for candidacy, in [0, 1].
    pub battery_threshold: f64,

    /// Fraction of total voters whose approval finalizes a round phase.
    pub consensus_threshold: f64,

    /// Safety floor: the authority rejects any leave that would drop the
    /// active set below this count.
    pub min_validators: usize,

    /// Hard ceiling on the active validator set.
    pub max_validators: usize,

    /// Absolute deadline offset applied to every consensus round.
    pub vote_timeout: Duration,

    /// Period of the heartbeat monitor. Round deadlines are checked lazily at
    /// tick boundaries, so real expiry latency is bounded by this interval.
    pub heartbeat_interval: Duration,

    /// Grant dual-radio candidates a bonus when scoring promotions.
    pub prefer_dual_radio: bool,

    /// Rotate long-tenured validators out when replacements are available.
    pub rotation_enabled: bool,

    /// Tenure after which a validator becomes a rotation candidate.
    pub rotation_interval: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            leave_signal_threshold: -85.0,
            enter_signal_threshold: -75.0,
            battery_threshold: 0.2,
            consensus_threshold: 0.67,
            min_validators: 3,
            max_validators: 7,
            vote_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            prefer_dual_radio: true,
            rotation_enabled: false,
            rotation_interval: Duration::from_secs(300),
        }
    }
}

impl ConsensusConfig {
    /// Create a config tuned for fast local runs (tests, simulation replays).
    #[must_use]
    pub fn fast() -> Self {
        Self {
            vote_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    /// Set the min/max bounds on the active validator set.
    #[must_use]
    pub fn with_validator_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_validators = min;
        self.max_validators = max;
        self
    }

    /// Set the quorum fraction.
    #[must_use]
    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    /// Set the leave/enter signal thresholds (dBm).
    #[must_use]
    pub fn with_signal_thresholds(mut self, leave: f64, enter: f64) -> Self {
        self.leave_signal_threshold = leave;
        self.enter_signal_threshold = enter;
        self
    }

    /// Set the minimum battery fraction for candidacy.
    #[must_use]
    pub fn with_battery_threshold(mut self, threshold: f64) -> Self {
        self.battery_threshold = threshold;
        self
    }

    /// Set the per-round vote timeout.
    #[must_use]
    pub fn with_vote_timeout(mut self, timeout: Duration) -> Self {
        self.vote_timeout = timeout;
        self
    }

    /// Set the heartbeat monitor period.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Enable validator rotation with the given tenure limit.
    #[must_use]
    pub fn with_rotation(mut self, interval: Duration) -> Self {
        self.rotation_enabled = true;
        self.rotation_interval = interval;
        self
    }

    /// Check the config for internally inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_validators > self.max_validators {
            return Err(ConfigError::ValidatorBounds {
                min: self.min_validators,
                max: self.max_validators,
            });
        }
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(ConfigError::ConsensusThreshold(self.consensus_threshold));
        }
        if !(0.0..=1.0).contains(&self.battery_threshold) {
            return Err(ConfigError::BatteryThreshold(self.battery_threshold));
        }
        if self.enter_signal_threshold < self.leave_signal_threshold {
            return Err(ConfigError::SignalThresholds {
                leave: self.leave_signal_threshold,
                enter: self.enter_signal_threshold,
            });
        }
        Ok(())
    }
}

/// An internally inconsistent [`ConsensusConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// min_validators exceeds max_validators
    #[error("min_validators {min} exceeds max_validators {max}")]
    ValidatorBounds { min: usize, max: usize },

    /// Quorum fraction outside (0, 1]
    #[error("consensus threshold {0} must be in (0, 1]")]
    ConsensusThreshold(f64),

    /// Battery threshold outside [0, 1]
    #[error("battery threshold {0} must be in [0, 1]")]
    BatteryThreshold(f64),

    /// Enter threshold below leave threshold would flap membership
    #[error("enter threshold {enter} dBm below leave threshold {leave} dBm")]
    SignalThresholds { leave: f64, enter: f64 },
}
