//! Execution supervision - runs exactly one attempt of a task and classifies
//! the result.
//!
//! The supervisor is the only writer of a task's fields while the task is in
//! flight. Cancellation and the natural outcome race on the in-flight
//! snapshot mutex; whichever commits a terminal status first wins and the
//! other result is discarded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agentrun_models::{AgentOutcome, ExecutionContext, RuntimeEvent, Task, TaskStatus};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::state::{InFlightEntry, RuntimeShared};

enum AttemptOutcome {
    Success(AgentOutcome),
    Error(String),
    TimedOut,
    Cancelled,
}

/// What the commit step decided, resolved under the snapshot lock.
enum Commit {
    Completed(Task),
    Failed(Task),
    Cancelled { task: Task, started: bool },
    Retry { task: Task, delay_ms: u64, error: String },
}

pub(crate) struct Supervisor {
    shared: Arc<RuntimeShared>,
}

impl Supervisor {
    pub fn new(shared: Arc<RuntimeShared>) -> Self {
        Self { shared }
    }

    /// Drive one execution attempt from `running` to a terminal state or a
    /// retry re-enqueue.
    pub async fn run(self, entry: Arc<InFlightEntry>, mut cancel_rx: oneshot::Receiver<()>) {
        // Transition to running, unless a cancellation landed between
        // dispatch and here.
        let task = {
            let mut snapshot = entry.snapshot.lock();
            if snapshot.status != TaskStatus::Cancelled {
                snapshot.start();
            }
            snapshot.clone()
        };

        if task.status == TaskStatus::Cancelled {
            self.shared.metrics.record_cancellation(false);
            self.shared.finalize_terminal(task).await;
            self.shared.wake.notify_one();
            return;
        }

        self.shared.metrics.record_attempt_started();
        self.shared.persist_update(&task).await;
        self.shared
            .emit(RuntimeEvent::TaskStarted { task: task.clone() })
            .await;
        info!(
            task_id = %task.id,
            agent_id = %task.agent_id,
            attempt = task.retry_count + 1,
            "Task execution started"
        );

        let context = ExecutionContext {
            task_id: task.id.clone(),
            organization_id: task.organization_id.clone(),
            user_id: task.user_id.clone(),
            correlation_id: task.correlation_id.clone(),
            budget_eur: task.budget_eur,
        };

        let started = Instant::now();
        let budget = Duration::from_millis(task.timeout_ms);
        let execution = self
            .shared
            .registry
            .execute(&task.agent_id, &task.inputs, &context);

        let outcome = tokio::select! {
            _ = &mut cancel_rx => AttemptOutcome::Cancelled,
            result = tokio::time::timeout(budget, execution) => match result {
                Ok(Ok(outcome)) => AttemptOutcome::Success(outcome),
                Ok(Err(error)) => AttemptOutcome::Error(error.to_string()),
                Err(_) => AttemptOutcome::TimedOut,
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let commit = self.commit(&entry, outcome, elapsed_ms);

        match commit {
            Commit::Completed(task) => {
                info!(
                    task_id = %task.id,
                    execution_time_ms = task.execution_time_ms,
                    cost_eur = task.cost_eur,
                    "Task completed"
                );
                self.shared.metrics.record_success(
                    task.execution_time_ms.unwrap_or(elapsed_ms),
                    task.cost_eur,
                );
                self.shared.finalize_terminal(task).await;
            }
            Commit::Failed(task) => {
                warn!(
                    task_id = %task.id,
                    error = task.error.as_deref().unwrap_or(""),
                    retry_count = task.retry_count,
                    "Task failed permanently"
                );
                self.shared
                    .metrics
                    .record_failure(task.execution_time_ms, true);
                self.shared.finalize_terminal(task).await;
            }
            Commit::Cancelled { task, started } => {
                info!(task_id = %task.id, "Task cancelled during execution");
                self.shared.metrics.record_cancellation(started);
                self.shared.finalize_terminal(task).await;
            }
            Commit::Retry {
                task,
                delay_ms,
                error,
            } => {
                warn!(
                    task_id = %task.id,
                    error = %error,
                    retry_count = task.retry_count,
                    delay_ms,
                    "Task attempt failed, retry scheduled"
                );
                self.shared.persist_update(&task).await;
                self.shared
                    .emit(RuntimeEvent::TaskRetry { task, delay_ms })
                    .await;
            }
        }

        self.shared.wake.notify_one();
    }

    /// Resolve the attempt result against any concurrent cancellation. Holds
    /// the snapshot lock for the whole decision so the ownership transfer
    /// (back to the queue on retry, out of the in-flight set otherwise)
    /// cannot be observed half-done.
    fn commit(
        &self,
        entry: &InFlightEntry,
        outcome: AttemptOutcome,
        elapsed_ms: i64,
    ) -> Commit {
        let mut snapshot = entry.snapshot.lock();

        if snapshot.status == TaskStatus::Cancelled {
            return Commit::Cancelled {
                task: snapshot.clone(),
                started: true,
            };
        }

        match outcome {
            AttemptOutcome::Cancelled => {
                // The oneshot fired but the snapshot was not flipped; treat
                // it as a cancellation all the same.
                snapshot.cancel("cancelled");
                Commit::Cancelled {
                    task: snapshot.clone(),
                    started: true,
                }
            }
            AttemptOutcome::Success(outcome) => {
                let execution_time_ms = outcome.execution_time_ms.unwrap_or(elapsed_ms);
                snapshot.complete(outcome.outputs, outcome.cost_eur, execution_time_ms);
                Commit::Completed(snapshot.clone())
            }
            AttemptOutcome::Error(error) => self.resolve_failure(&mut snapshot, error, elapsed_ms),
            AttemptOutcome::TimedOut => {
                let error = format!("Execution timed out after {}ms", snapshot.timeout_ms);
                self.resolve_failure(&mut snapshot, error, elapsed_ms)
            }
        }
    }

    /// Retry if attempts remain, otherwise fail permanently. Called with the
    /// snapshot lock held.
    fn resolve_failure(&self, snapshot: &mut Task, error: String, elapsed_ms: i64) -> Commit {
        if snapshot.can_retry() {
            let delay_ms = self.shared.retry.delay_for(snapshot.retry_count + 1);
            snapshot.prepare_retry(delay_ms);
            let task = snapshot.clone();
            // Ownership moves back to the queue while the lock is held, so a
            // concurrent cancel sees either an in-flight task or a queued
            // one, never neither.
            self.shared.in_flight.remove(&task.id);
            self.shared.queue.push(task.clone());
            Commit::Retry {
                task,
                delay_ms,
                error,
            }
        } else {
            snapshot.fail(error, Some(elapsed_ms));
            Commit::Failed(snapshot.clone())
        }
    }
}
