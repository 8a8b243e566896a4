//! Event-rate governor: storm detection and reload signalling
//!
//! Every applied effect is counted in a per-second bucket. A bucket above
//! the storm threshold marks the project as spiking; once the newest bucket
//! is followed by a full quiet period the project needs its watch session
//! recreated. The orchestrator performs the reload and resets the counter.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Thresholds for storm detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorSettings {
    /// A one-second bucket above this count is a storm
    pub storm_threshold: u32,
    /// Silence required after the last bucket before reloading
    pub quiet_period: Duration,
    /// Buckets older than this are forgotten while no storm is in progress
    pub history_window: Duration,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            storm_threshold: 5,
            quiet_period: Duration::from_secs(2),
            history_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorState {
    Idle,
    Spiking,
    ReloadRequired,
}

/// Per-project operation history
#[derive(Debug, Default, Clone)]
pub struct OperationCounter {
    /// Unix second -> operations applied in that second
    buckets: BTreeMap<i64, u32>,
    spike_observed: bool,
    reload_required: bool,
}

impl OperationCounter {
    /// Count one operation; ignored once a reload is pending
    pub fn record(&mut self, second: i64) {
        if self.reload_required {
            return;
        }
        *self.buckets.entry(second).or_insert(0) += 1;
    }

    pub fn evaluate(&mut self, now: i64, settings: &GovernorSettings) -> GovernorState {
        if self.peak() > settings.storm_threshold {
            self.spike_observed = true;
        }

        if self.spike_observed {
            // only the newest bucket matters while spiking
            if let Some((&last, _)) = self.buckets.last_key_value() {
                let quiet = settings.quiet_period.as_secs() as i64;
                if now - last > quiet {
                    self.reload_required = true;
                }
            }
        } else {
            let oldest = now - settings.history_window.as_secs() as i64;
            self.buckets.retain(|&second, _| second >= oldest);
        }

        self.state()
    }

    pub fn state(&self) -> GovernorState {
        if self.reload_required {
            GovernorState::ReloadRequired
        } else if self.spike_observed {
            GovernorState::Spiking
        } else {
            GovernorState::Idle
        }
    }

    pub fn peak(&self) -> u32 {
        self.buckets.values().copied().max().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
        self.spike_observed = false;
        self.reload_required = false;
    }
}

/// Tracks operation rates for every project
#[derive(Debug, Default)]
pub struct EventRateGovernor {
    settings: GovernorSettings,
    counters: Mutex<HashMap<String, OperationCounter>>,
}

impl EventRateGovernor {
    pub fn new(settings: GovernorSettings) -> Self {
        Self {
            settings,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    /// Count one applied operation now
    pub fn record(&self, project: &str) {
        self.record_at(project, now_second());
    }

    pub fn record_at(&self, project: &str, second: i64) {
        let mut counters = self.counters.lock();
        counters.entry(project.to_string()).or_default().record(second);
    }

    /// Re-evaluate a project's state now
    pub fn evaluate(&self, project: &str) -> GovernorState {
        self.evaluate_at(project, now_second())
    }

    pub fn evaluate_at(&self, project: &str, now: i64) -> GovernorState {
        let mut counters = self.counters.lock();
        let Some(counter) = counters.get_mut(project) else {
            return GovernorState::Idle;
        };

        let before = counter.state();
        let after = counter.evaluate(now, &self.settings);
        if before != after {
            match after {
                GovernorState::Spiking => warn!(
                    project = %project,
                    peak = counter.peak(),
                    "Operation storm detected, waiting for activity to settle"
                ),
                GovernorState::ReloadRequired => warn!(
                    project = %project,
                    "Storm settled, watch session must be reloaded"
                ),
                GovernorState::Idle => {}
            }
        }
        after
    }

    pub fn state(&self, project: &str) -> GovernorState {
        self.counters
            .lock()
            .get(project)
            .map(OperationCounter::state)
            .unwrap_or(GovernorState::Idle)
    }

    pub fn must_reload(&self, project: &str) -> bool {
        self.state(project) == GovernorState::ReloadRequired
    }

    /// Clear a project's history after its session was recreated
    pub fn reset(&self, project: &str) {
        if let Some(counter) = self.counters.lock().get_mut(project) {
            counter.reset();
            debug!(project = %project, "Operation history reset");
        }
    }
}

fn now_second() -> i64 {
    chrono::Utc::now().timestamp()
}
