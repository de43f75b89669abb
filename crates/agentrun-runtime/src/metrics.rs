//! Metrics and health aggregation.
//!
//! Counters and averages are updated incrementally as outcomes arrive, never
//! recomputed from history. Cancellations do not count against the success
//! ratio.

use agentrun_models::{RuntimeMetrics, SystemHealth};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct MetricsState {
    total: u64,
    successful: u64,
    failed: u64,
    cancelled: u64,
    avg_execution_time_ms: f64,
    execution_samples: u64,
    avg_cost_eur: f64,
    cost_samples: u64,
    total_cost_eur: f64,
}

impl MetricsState {
    fn record_execution_time(&mut self, execution_time_ms: i64) {
        self.execution_samples += 1;
        self.avg_execution_time_ms +=
            (execution_time_ms as f64 - self.avg_execution_time_ms) / self.execution_samples as f64;
    }

    fn record_cost(&mut self, cost_eur: f64) {
        self.cost_samples += 1;
        self.avg_cost_eur += (cost_eur - self.avg_cost_eur) / self.cost_samples as f64;
        self.total_cost_eur += cost_eur;
    }

    fn success_ratio(&self) -> f64 {
        let window = self.successful + self.failed;
        if window == 0 {
            1.0
        } else {
            self.successful as f64 / window as f64
        }
    }
}

/// Rolling counters over everything the runtime has observed so far.
#[derive(Default)]
pub struct MetricsAggregator {
    state: Mutex<MetricsState>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An execution attempt was handed to a supervisor.
    pub fn record_attempt_started(&self) {
        self.state.lock().total += 1;
    }

    pub fn record_success(&self, execution_time_ms: i64, cost_eur: Option<f64>) {
        let mut state = self.state.lock();
        state.successful += 1;
        state.record_execution_time(execution_time_ms);
        if let Some(cost) = cost_eur {
            state.record_cost(cost);
        }
    }

    /// Terminal failure. `started` is false for tasks degraded without an
    /// attempt (e.g. a dependency that can never complete), which still must
    /// count toward the total.
    pub fn record_failure(&self, execution_time_ms: Option<i64>, started: bool) {
        let mut state = self.state.lock();
        state.failed += 1;
        if !started {
            state.total += 1;
        }
        if let Some(elapsed) = execution_time_ms {
            state.record_execution_time(elapsed);
        }
    }

    /// Cancellation. `started` is false when the task never left `pending`.
    pub fn record_cancellation(&self, started: bool) {
        let mut state = self.state.lock();
        state.cancelled += 1;
        if !started {
            state.total += 1;
        }
    }

    pub fn health(&self) -> SystemHealth {
        SystemHealth::from_success_ratio(self.state.lock().success_ratio())
    }

    /// Snapshot combined with the live gauges owned by the scheduler.
    pub fn snapshot(&self, active_executions: u64, queued_tasks: u64) -> RuntimeMetrics {
        let state = self.state.lock();
        RuntimeMetrics {
            total_executions: state.total,
            successful_executions: state.successful,
            failed_executions: state.failed,
            cancelled_executions: state.cancelled,
            average_execution_time_ms: state.avg_execution_time_ms,
            average_cost_eur: state.avg_cost_eur,
            total_cost_eur: state.total_cost_eur,
            active_executions,
            queued_tasks,
            system_health: SystemHealth::from_success_ratio(state.success_ratio()),
            last_updated: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_totals_invariant(metrics: &RuntimeMetrics) {
        assert!(
            metrics.successful_executions
                + metrics.failed_executions
                + metrics.cancelled_executions
                <= metrics.total_executions
        );
    }

    #[test]
    fn test_empty_window_is_healthy() {
        let aggregator = MetricsAggregator::new();
        assert_eq!(aggregator.health(), SystemHealth::Healthy);
        let snapshot = aggregator.snapshot(0, 0);
        assert_eq!(snapshot.total_executions, 0);
        assert_eq!(snapshot.average_execution_time_ms, 0.0);
    }

    #[test]
    fn test_running_average_is_incremental() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_attempt_started();
        aggregator.record_success(1_000, Some(0.10));
        aggregator.record_attempt_started();
        aggregator.record_success(2_000, Some(0.30));

        let snapshot = aggregator.snapshot(0, 0);
        assert!((snapshot.average_execution_time_ms - 1_500.0).abs() < 1e-9);
        assert!((snapshot.average_cost_eur - 0.20).abs() < 1e-9);
        assert!((snapshot.total_cost_eur - 0.40).abs() < 1e-9);
        assert_totals_invariant(&snapshot);
    }

    #[test]
    fn test_failed_attempt_contributes_execution_time() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_attempt_started();
        aggregator.record_success(100, None);
        aggregator.record_attempt_started();
        aggregator.record_failure(Some(300), true);

        let snapshot = aggregator.snapshot(0, 0);
        assert!((snapshot.average_execution_time_ms - 200.0).abs() < 1e-9);
        // No cost reported anywhere
        assert_eq!(snapshot.total_cost_eur, 0.0);
        assert_totals_invariant(&snapshot);
    }

    #[test]
    fn test_unstarted_outcomes_count_toward_total() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_cancellation(false);
        aggregator.record_failure(None, false);

        let snapshot = aggregator.snapshot(0, 0);
        assert_eq!(snapshot.total_executions, 2);
        assert_eq!(snapshot.cancelled_executions, 1);
        assert_eq!(snapshot.failed_executions, 1);
        assert_totals_invariant(&snapshot);
    }

    #[test]
    fn test_retries_inflate_total_but_not_outcomes() {
        let aggregator = MetricsAggregator::new();
        // Three attempts of one task that finally failed
        for _ in 0..3 {
            aggregator.record_attempt_started();
        }
        aggregator.record_failure(Some(50), true);

        let snapshot = aggregator.snapshot(0, 0);
        assert_eq!(snapshot.total_executions, 3);
        assert_eq!(snapshot.failed_executions, 1);
        assert_totals_invariant(&snapshot);
    }

    #[test]
    fn test_cancellations_do_not_affect_health() {
        let aggregator = MetricsAggregator::new();
        for _ in 0..19 {
            aggregator.record_attempt_started();
            aggregator.record_success(10, None);
        }
        aggregator.record_attempt_started();
        aggregator.record_failure(Some(10), true);
        // 19/20 = 0.95 -> healthy
        assert_eq!(aggregator.health(), SystemHealth::Healthy);

        for _ in 0..100 {
            aggregator.record_cancellation(false);
        }
        assert_eq!(aggregator.health(), SystemHealth::Healthy);
    }

    #[test]
    fn test_health_degrades_with_failures() {
        let aggregator = MetricsAggregator::new();
        for _ in 0..9 {
            aggregator.record_attempt_started();
            aggregator.record_success(10, None);
        }
        aggregator.record_attempt_started();
        aggregator.record_failure(Some(10), true);
        // 9/10 = 0.90 -> degraded
        assert_eq!(aggregator.health(), SystemHealth::Degraded);

        for _ in 0..3 {
            aggregator.record_attempt_started();
            aggregator.record_failure(Some(10), true);
        }
        // 9/13 < 0.80 -> unhealthy
        assert_eq!(aggregator.health(), SystemHealth::Unhealthy);
    }

    #[test]
    fn test_snapshot_carries_live_gauges() {
        let aggregator = MetricsAggregator::new();
        let snapshot = aggregator.snapshot(3, 7);
        assert_eq!(snapshot.active_executions, 3);
        assert_eq!(snapshot.queued_tasks, 7);
        assert!(snapshot.last_updated > 0);
    }
}
