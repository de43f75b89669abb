//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

// Default configuration constants
const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 50;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 300_000;
const DEFAULT_MAX_EXECUTION_HISTORY: usize = 1_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;

/// Tunables for one runtime instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Ceiling on simultaneously running tasks.
    pub max_concurrent_executions: usize,
    /// Per-attempt wall-clock budget when the agent declares none.
    pub default_timeout_ms: u64,
    /// Attempts allowed after the first failure.
    pub max_retries: u32,
    /// Base backoff unit; the actual delay scales with the attempt number.
    pub retry_delay_ms: u64,
    pub health_check_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    /// Bound on the in-memory terminal history (oldest evicted first).
    pub max_execution_history: usize,
    /// Dispatcher poll interval - the latency/wasted-work trade-off.
    pub poll_interval_ms: u64,
    /// How long `stop` waits for in-flight tasks to reach a terminal state.
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            max_execution_history: DEFAULT_MAX_EXECUTION_HISTORY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl RuntimeConfig {
    /// Validate configuration values. A zero in any of these would stall the
    /// dispatcher or its timers.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_concurrent_executions == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(RuntimeError::InvalidConfig(
                "default_timeout_ms must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(RuntimeError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.health_check_interval_ms == 0 || self.cleanup_interval_ms == 0 {
            return Err(RuntimeError::InvalidConfig(
                "health and cleanup intervals must be positive".to_string(),
            ));
        }
        if self.max_execution_history == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_execution_history must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
