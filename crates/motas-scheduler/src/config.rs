//! Scheduler configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::ScoreWeights;

/// Tunables of the scheduling engine and its loop. Every field has a
/// default, so a partial (or missing) config file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Initial capacity of the schedule queue.
    pub queue_capacity: usize,
    /// Utility-score weight of the link communication cost.
    pub alpha_cost: f64,
    /// Utility-score weight of the bandwidth interference.
    pub alpha_interference: f64,
    /// Utility-score weight of the resource fragmentation.
    pub alpha_fragmentation: f64,
    /// Idle sleep between queue polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Default utilization-spread threshold for nodes built from config.
    pub node_threshold: f64,
    /// Default per-type fragmentation weight for nodes built from config.
    pub node_arg_weight: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 20,
            alpha_cost: 0.33,
            alpha_interference: 0.33,
            alpha_fragmentation: 0.33,
            poll_interval_ms: 100,
            node_threshold: 0.8,
            node_arg_weight: 0.5,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            cost: self.alpha_cost,
            interference: self.alpha_interference,
            fragmentation: self.alpha_fragmentation,
        }
    }
}
