//! Runtime configuration
//!
//! Configuration for the scheduler: cycle bounds, parallelism, timeouts,
//! join polling and debug stepping.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration shared by an agent and every run forked from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum invocations of one component per request tag.
    /// An agent definition may override it.
    pub circular_limit: u32,

    /// Maximum ticks before a run-to-completion is aborted
    pub max_ticks: u64,

    /// Maximum concurrent component invocations within a batch
    pub parallelism: usize,

    /// Timeout for a single component invocation
    #[serde(with = "humantime_serde")]
    pub component_timeout: Duration,

    /// Timeout for an entire run-to-completion
    #[serde(with = "humantime_serde")]
    pub run_timeout: Duration,

    /// Interval at which joins poll the job registry
    #[serde(with = "humantime_serde")]
    pub join_poll_interval: Duration,

    /// Join budget used when a join component has no `max_time`
    #[serde(with = "humantime_serde")]
    pub default_join_wait: Duration,

    /// Run exactly one tick per client call
    pub debug: bool,

    /// Keep snapshots of closed sessions in the store
    pub retain_closed_sessions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            circular_limit: 1000,
            max_ticks: 10_000,
            parallelism: num_cpus::get(),
            component_timeout: Duration::from_secs(300), // 5 min per component
            run_timeout: Duration::from_secs(3600),      // 1 hour total
            join_poll_interval: Duration::from_millis(100),
            default_join_wait: Duration::from_secs(30),
            debug: false,
            retain_closed_sessions: false,
        }
    }
}

impl EngineConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the circular-call limit
    pub fn with_circular_limit(mut self, limit: u32) -> Self {
        self.circular_limit = limit.max(1);
        self
    }

    /// Set maximum ticks
    pub fn with_max_ticks(mut self, max: u64) -> Self {
        self.max_ticks = max;
        self
    }

    /// Set parallelism level
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set component timeout
    pub fn with_component_timeout(mut self, timeout: Duration) -> Self {
        self.component_timeout = timeout;
        self
    }

    /// Set run timeout
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set join poll interval
    pub fn with_join_poll_interval(mut self, interval: Duration) -> Self {
        self.join_poll_interval = interval;
        self
    }

    /// Set the default join wait
    pub fn with_default_join_wait(mut self, wait: Duration) -> Self {
        self.default_join_wait = wait;
        self
    }

    /// Enable or disable debug stepping
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Keep or drop snapshots of closed sessions
    pub fn with_retain_closed_sessions(mut self, retain: bool) -> Self {
        self.retain_closed_sessions = retain;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.circular_limit, 1000);
        assert_eq!(config.max_ticks, 10_000);
        assert!(config.parallelism >= 1);
        assert_eq!(config.join_poll_interval, Duration::from_millis(100));
        assert!(!config.debug);
    }

    #[test]
    fn test_builder_clamps() {
        let config = EngineConfig::new()
            .with_parallelism(0)
            .with_circular_limit(0)
            .with_debug(true);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.circular_limit, 1);
        assert!(config.debug);
    }

    #[test]
    fn test_humantime_roundtrip() {
        let config = EngineConfig::new().with_component_timeout(Duration::from_secs(90));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"component_timeout\":\"1m 30s\""));

        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.component_timeout, Duration::from_secs(90));
    }
}
