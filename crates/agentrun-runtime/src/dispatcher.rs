//! Dispatcher - the runtime's single control loop.
//!
//! One loop per runtime makes every admission decision: it checks capacity
//! against the in-flight set, pops the next admissible task, and hands it to
//! a supervisor that runs concurrently with the next iteration. The loop
//! polls, and is additionally woken whenever the queue or capacity changes.
//! Health checks and cleanup run as interval ticks on the same loop.

use std::sync::Arc;
use std::time::Duration;

use agentrun_models::RuntimeEvent;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info};

use crate::queue::PopOutcome;
use crate::state::{InFlightEntry, RuntimeShared};
use crate::supervisor::Supervisor;

pub(crate) struct Dispatcher {
    shared: Arc<RuntimeShared>,
}

impl Dispatcher {
    pub fn new(shared: Arc<RuntimeShared>) -> Self {
        Self { shared }
    }

    /// Main control loop. Exits on shutdown signal.
    pub async fn run_loop(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let config = &self.shared.config;

        let mut poll = interval(Duration::from_millis(config.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let health_period = Duration::from_millis(config.health_check_interval_ms);
        let mut health = interval_at(Instant::now() + health_period, health_period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cleanup_period = Duration::from_millis(config.cleanup_interval_ms);
        let mut cleanup = interval_at(Instant::now() + cleanup_period, cleanup_period);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            max_concurrent = config.max_concurrent_executions,
            poll_interval_ms = config.poll_interval_ms,
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Dispatcher shutting down");
                    break;
                }
                _ = poll.tick() => self.dispatch_ready().await,
                _ = self.shared.wake.notified() => self.dispatch_ready().await,
                _ = health.tick() => self.health_check().await,
                _ = cleanup.tick() => {
                    self.shared.run_cleanup();
                }
            }
        }
    }

    /// Launch admissible tasks until capacity or the queue runs out.
    ///
    /// This is the single atomic decision step: selection, pop and in-flight
    /// registration happen on this loop task only, so concurrent dispatch of
    /// the same queue entry is impossible.
    async fn dispatch_ready(&self) {
        loop {
            let running = self.shared.in_flight.len();
            let slots = self
                .shared
                .config
                .max_concurrent_executions
                .saturating_sub(running);
            if slots == 0 {
                debug!(running, "Concurrency ceiling reached, waiting");
                return;
            }

            let now = chrono::Utc::now().timestamp_millis();
            match self.shared.queue.pop_admissible(
                now,
                &self.shared.completed_ids,
                &self.shared.terminal_failed_ids,
            ) {
                None => return,
                Some(PopOutcome::DependencyFailed { mut task, dependency }) => {
                    // One bad task must never stop the loop from servicing
                    // others.
                    error!(
                        task_id = %task.id,
                        dependency = %dependency,
                        "Dependency can never complete, failing task"
                    );
                    task.fail(format!("Dependency '{}' did not complete", dependency), None);
                    self.shared.metrics.record_failure(None, false);
                    self.shared.finalize_terminal(task).await;
                }
                Some(PopOutcome::Ready(task)) => {
                    debug!(task_id = %task.id, priority = ?task.priority, "Dispatching task");
                    let (entry, cancel_rx) = InFlightEntry::new(task.clone());
                    self.shared.in_flight.insert(task.id.clone(), entry.clone());
                    let supervisor = Supervisor::new(self.shared.clone());
                    tokio::spawn(async move {
                        supervisor.run(entry, cancel_rx).await;
                    });
                }
            }
        }
    }

    async fn health_check(&self) {
        let metrics = self.shared.snapshot_metrics();
        debug!(
            health = ?metrics.system_health,
            active = metrics.active_executions,
            queued = metrics.queued_tasks,
            total = metrics.total_executions,
            "Health check"
        );
        self.shared.emit(RuntimeEvent::HealthCheck { metrics }).await;
    }
}
