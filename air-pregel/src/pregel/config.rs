//! Pregel runtime configuration
//!
//! Superstep budget, parallelism, timeouts and checkpoint cadence.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pregel runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PregelConfig {
    /// Maximum supersteps before the run fails
    pub max_supersteps: usize,

    /// Maximum concurrent vertex computations
    pub parallelism: usize,

    /// Checkpoint frequency (every N supersteps, 0 = disabled)
    pub checkpoint_interval: usize,

    /// Newest checkpoints kept after each save (0 = keep all)
    #[serde(default)]
    pub checkpoint_retention: usize,

    /// Timeout for a single vertex computation
    #[serde(with = "humantime_serde")]
    pub vertex_timeout: Duration,

    /// Timeout for the entire run
    #[serde(with = "humantime_serde")]
    pub run_timeout: Duration,

    /// Emit per-superstep debug events
    pub log_supersteps: bool,
}

impl Default for PregelConfig {
    fn default() -> Self {
        Self {
            max_supersteps: 1000,
            parallelism: num_cpus::get(),
            checkpoint_interval: 0,
            checkpoint_retention: 0,
            vertex_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(600),
            log_supersteps: true,
        }
    }
}

impl PregelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_supersteps(mut self, max: usize) -> Self {
        self.max_supersteps = max;
        self
    }

    /// Set parallelism level (at least 1)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set checkpoint interval (0 to disable)
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_checkpoint_retention(mut self, keep: usize) -> Self {
        self.checkpoint_retention = keep;
        self
    }

    pub fn with_vertex_timeout(mut self, timeout: Duration) -> Self {
        self.vertex_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_superstep_logging(mut self, enabled: bool) -> Self {
        self.log_supersteps = enabled;
        self
    }

    pub fn checkpointing_enabled(&self) -> bool {
        self.checkpoint_interval > 0
    }

    /// Whether a checkpoint is taken before running `superstep`
    #[allow(clippy::manual_is_multiple_of)]
    pub fn should_checkpoint(&self, superstep: usize) -> bool {
        self.checkpointing_enabled() && superstep > 0 && superstep % self.checkpoint_interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PregelConfig::default();
        assert_eq!(config.max_supersteps, 1000);
        assert!(config.parallelism >= 1);
        assert!(!config.checkpointing_enabled());
    }

    #[test]
    fn test_builder() {
        let config = PregelConfig::new()
            .with_max_supersteps(50)
            .with_parallelism(0)
            .with_checkpoint_interval(5)
            .with_vertex_timeout(Duration::from_secs(1))
            .with_superstep_logging(false);
        assert_eq!(config.max_supersteps, 50);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.vertex_timeout, Duration::from_secs(1));
        assert!(!config.log_supersteps);
    }

    #[test]
    fn test_should_checkpoint() {
        let config = PregelConfig::new().with_checkpoint_interval(4);
        assert!(!config.should_checkpoint(0));
        assert!(!config.should_checkpoint(3));
        assert!(config.should_checkpoint(4));
        assert!(config.should_checkpoint(8));
        assert!(!PregelConfig::new().should_checkpoint(4));
    }

    #[test]
    fn test_durations_use_humantime() {
        let config = PregelConfig::new().with_run_timeout(Duration::from_secs(90));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["run_timeout"], "1m 30s");
        let back: PregelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
