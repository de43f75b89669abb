//! Runtime metrics snapshot and health classification.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Coarse operational signal derived from the success ratio. It does not
/// gate admission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, TS, PartialEq, Eq)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl SystemHealth {
    /// Classify a success ratio: `>= 0.95` healthy, `>= 0.80` degraded,
    /// otherwise unhealthy.
    pub fn from_success_ratio(ratio: f64) -> Self {
        if ratio >= 0.95 {
            SystemHealth::Healthy
        } else if ratio >= 0.80 {
            SystemHealth::Degraded
        } else {
            SystemHealth::Unhealthy
        }
    }
}

/// Point-in-time view of the runtime's counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RuntimeMetrics {
    /// Execution attempts started, plus tasks cancelled before starting.
    #[ts(type = "number")]
    pub total_executions: u64,
    #[ts(type = "number")]
    pub successful_executions: u64,
    #[ts(type = "number")]
    pub failed_executions: u64,
    #[ts(type = "number")]
    pub cancelled_executions: u64,
    /// Running average over terminal completed and failed tasks.
    pub average_execution_time_ms: f64,
    /// Running average over terminal tasks that reported a cost.
    pub average_cost_eur: f64,
    pub total_cost_eur: f64,
    /// Tasks currently in flight.
    #[ts(type = "number")]
    pub active_executions: u64,
    /// Tasks waiting in the admission queue.
    #[ts(type = "number")]
    pub queued_tasks: u64,
    pub system_health: SystemHealth,
    #[ts(type = "number")]
    pub last_updated: i64,
}
