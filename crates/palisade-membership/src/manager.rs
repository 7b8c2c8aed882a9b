//! Manager façade: the public surface of the membership protocol.
//!
//! Owns the lock around the protocol state and the heartbeat monitor's
//! lifecycle. The two write entry points (`register_node`,
//! `update_node_status`) are fed by an external mobility simulator; the
//! query surface (`active_validators`, `validator_info`, `statistics`) is
//! consumed by the routing and transaction-validation layers. Any consensus
//! round a call transitively opens has its vote fan-out run after the lock
//! is released.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use palisade_consensus::{
    is_eligible_candidate, ConsensusConfig, LeaveReason, NodeId, NodeStatus, ValidatorNode, Zone,
};

use crate::engine;
use crate::error::{Error, Result};
use crate::heartbeat;
use crate::state::ProtocolState;
use crate::stats::ConsensusStats;

/// Registration telemetry for a new node.
#[derive(Debug, Clone, Copy)]
pub struct NodeRegistration {
    pub id: NodeId,
    pub zone: Zone,
    pub signal_dbm: f64,
    pub battery: f64,
    pub cert_valid: bool,
    pub dual_radio: bool,
}

/// Partial telemetry update; unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryUpdate {
    signal_dbm: Option<f64>,
    battery: Option<f64>,
    zone: Option<Zone>,
}

impl TelemetryUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signal_dbm(mut self, dbm: f64) -> Self {
        self.signal_dbm = Some(dbm);
        self
    }

    #[must_use]
    pub fn battery(mut self, fraction: f64) -> Self {
        self.battery = Some(fraction);
        self
    }

    #[must_use]
    pub fn zone(mut self, zone: Zone) -> Self {
        self.zone = Some(zone);
        self
    }
}

struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The consensus validator manager.
pub struct ValidatorManager {
    config: ConsensusConfig,
    state: Arc<Mutex<ProtocolState>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ValidatorManager {
    /// Create a manager over an empty membership. Fails on an internally
    /// inconsistent config.
    pub fn new(config: ConsensusConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(ProtocolState::new())),
            monitor: Mutex::new(None),
        })
    }

    /// The configuration the manager runs with.
    #[must_use]
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Register a new node as a candidate.
    ///
    /// Rejects duplicates and ineligible nodes. Shortage fast-track: the
    /// decision reads the active count as of the last settled tick, not the
    /// live one, so every registration in a burst between ticks sees the
    /// same shortage and fast-tracks individually - a burst can overshoot
    /// the minimum (never the maximum).
    pub async fn register_node(&self, registration: NodeRegistration) -> bool {
        let mut state = self.state.lock().await;
        if state.registry.contains(registration.id) {
            warn!(node = %registration.id, "registration rejected, node already known");
            return false;
        }
        let node = ValidatorNode::new(
            registration.id,
            registration.zone,
            registration.signal_dbm,
            registration.battery,
            registration.cert_valid,
            registration.dual_radio,
        );
        if !is_eligible_candidate(&node, &self.config) {
            debug!(node = %node.id, zone = %node.zone, "registration rejected, node not eligible");
            return false;
        }
        let inserted = state.registry.insert_candidate(node);
        debug_assert!(inserted, "id was checked unknown above");
        info!(node = %registration.id, zone = %registration.zone, "candidate registered");

        if state.shortage_baseline < self.config.min_validators {
            engine::fast_track_candidate(&mut state, &self.config, registration.id);
        }
        true
    }

    /// Apply a telemetry update to a live node and run the trigger rules.
    ///
    /// In order: an active validator whose zone became `MeshOnly` is forced
    /// to leave regardless of signal; an active validator below its leave
    /// threshold is forced to leave; a candidate above the enter threshold
    /// is re-checked for promotion. Returns false for unknown or retired
    /// nodes.
    pub async fn update_node_status(&self, node_id: NodeId, update: TelemetryUpdate) -> bool {
        let request = {
            let mut state = self.state.lock().await;
            let Some(node) = state.registry.get_live_mut(node_id) else {
                debug!(node = %node_id, "telemetry for unknown or retired node dropped");
                return false;
            };
            if let Some(signal) = update.signal_dbm {
                node.signal_dbm = signal;
            }
            if let Some(battery) = update.battery {
                node.battery = battery;
            }
            if let Some(zone) = update.zone {
                node.zone = zone;
            }
            node.touch();

            let is_validator = node.is_validator();
            let status = node.status;
            let zone = node.zone;
            let signal = node.signal_dbm;
            let leave_floor = node.leave_threshold(self.config.leave_signal_threshold);

            if is_validator && !zone.has_infrastructure() {
                engine::initiate_forced_leave(
                    &mut state,
                    &self.config,
                    node_id,
                    LeaveReason::EnteredMeshZone,
                )
            } else if is_validator && signal < leave_floor {
                engine::initiate_forced_leave(
                    &mut state,
                    &self.config,
                    node_id,
                    LeaveReason::WeakSignal,
                )
            } else if status == NodeStatus::Candidate && signal > self.config.enter_signal_threshold
            {
                engine::try_promote_candidate(&mut state, &self.config, node_id)
            } else {
                None
            }
        };
        if let Some(request) = request {
            engine::dispatch(&self.state, &self.config, request).await;
        }
        true
    }

    /// Ids of the active validator set, sorted.
    pub async fn active_validators(&self) -> Vec<NodeId> {
        self.state.lock().await.registry.active_ids()
    }

    /// Full record of a node, looked up across all collections.
    pub async fn validator_info(&self, node_id: NodeId) -> Option<ValidatorNode> {
        self.state.lock().await.registry.get(node_id).cloned()
    }

    /// Point-in-time protocol statistics.
    pub async fn statistics(&self) -> ConsensusStats {
        let state = self.state.lock().await;
        ConsensusStats {
            active_count: state.registry.active_count(),
            candidate_count: state.registry.candidate_count(),
            retired_count: state.registry.retired_count(),
            pending_tx_count: state.pending.len(),
            open_round_count: state.rounds.len(),
            metrics: state.metrics.snapshot(),
            config: self.config.clone(),
        }
    }

    /// Run one heartbeat pass by hand.
    ///
    /// The background monitor drives the same path; a simulation driver can
    /// call this instead of `start` to step the protocol deterministically.
    pub async fn tick(&self) {
        heartbeat::run_tick(&self.state, &self.config).await;
    }

    /// Spawn the heartbeat monitor task.
    pub async fn start(&self) -> Result<()> {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let (shutdown, mut signal) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval(config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => heartbeat::run_tick(&state, &config).await,
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("heartbeat monitor exiting");
        });

        *monitor = Some(MonitorHandle { shutdown, task });
        info!(interval = ?self.config.heartbeat_interval, "heartbeat monitor started");
        Ok(())
    }

    /// Signal the heartbeat monitor to stop and join it with a bounded wait.
    /// In-flight rounds are abandoned, not cancelled.
    pub async fn stop(&self) -> Result<()> {
        let Some(handle) = self.monitor.lock().await.take() else {
            return Err(Error::NotRunning);
        };
        let _ = handle.shutdown.send(true);

        let wait = self.config.heartbeat_interval * 2 + Duration::from_millis(100);
        let mut task = handle.task;
        match timeout(wait, &mut task).await {
            Ok(Ok(())) => {
                info!("heartbeat monitor stopped");
                Ok(())
            }
            Ok(Err(join_err)) => Err(Error::MonitorFailed(join_err.to_string())),
            Err(_) => {
                task.abort();
                Err(Error::ShutdownTimeout(wait))
            }
        }
    }
}
