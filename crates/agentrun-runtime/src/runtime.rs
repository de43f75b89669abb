//! Runtime facade - the public surface of the agent task runtime.
//!
//! An `AgentTaskRuntime` is an explicit, constructed object with a
//! `start`/`stop` lifecycle. It composes the admission queue, dispatcher,
//! execution supervision and metrics, and persists through the injected task
//! store. Submission is synchronous; all later outcomes are observed through
//! `get_task_status` or the event stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use agentrun_models::{RuntimeEvent, RuntimeMetrics, SubmitRequest, Task, TaskStatus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RuntimeError;
use crate::events::TaskEventEmitter;
use crate::registry::AgentRegistry;
use crate::state::RuntimeShared;
use crate::store::TaskStore;

/// How many persisted records one recovery scan loads.
const RECOVERY_SCAN_LIMIT: usize = 10_000;

/// Poll step while waiting for in-flight tasks to drain on shutdown.
const SHUTDOWN_POLL_MS: u64 = 20;

struct LoopHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

/// The asynchronous agent task runtime.
pub struct AgentTaskRuntime {
    shared: Arc<RuntimeShared>,
    lifecycle: tokio::sync::Mutex<Option<LoopHandle>>,
    running: AtomicBool,
}

impl AgentTaskRuntime {
    /// Create a runtime. Invalid configuration is fatal here, before any
    /// task can be accepted.
    pub fn new(
        config: RuntimeConfig,
        registry: Arc<dyn AgentRegistry>,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(RuntimeShared::new(config, registry, store)),
            lifecycle: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Attach an additional notification collaborator.
    pub fn add_emitter(&self, emitter: Arc<dyn TaskEventEmitter>) {
        self.shared.add_emitter(emitter);
    }

    /// Receiver for the runtime's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the dispatcher loop. Reloads persisted pending tasks first, so
    /// an unplanned restart does not lose queued work.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }

        self.recover_from_store().await?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let dispatcher = Dispatcher::new(self.shared.clone());
        let join = tokio::spawn(dispatcher.run_loop(shutdown_rx));
        *lifecycle = Some(LoopHandle { shutdown_tx, join });
        self.running.store(true, Ordering::SeqCst);
        drop(lifecycle);

        info!("Agent task runtime started");
        self.shared
            .emit(RuntimeEvent::RuntimeStarted {
                timestamp: chrono::Utc::now().timestamp_millis(),
            })
            .await;
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stop the dispatcher, cancel in-flight work with reason
    /// "runtime shutdown", and wait a bounded grace period for supervisors
    /// to finish their cleanup. Queued tasks stay pending in the store and
    /// are reloaded on the next start.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(handle) = lifecycle.take() else {
            return Err(RuntimeError::NotRunning);
        };
        self.running.store(false, Ordering::SeqCst);
        info!("Agent task runtime stopping");

        let _ = handle.shutdown_tx.send(());
        if let Err(error) = handle.join.await {
            warn!(error = %error, "Dispatcher loop ended abnormally");
        }

        let in_flight_ids: Vec<String> = self
            .shared
            .in_flight
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in &in_flight_ids {
            self.request_cancel_in_flight(id, "runtime shutdown");
        }

        let deadline = Instant::now()
            + Duration::from_millis(self.shared.config.shutdown_grace_ms);
        while !self.shared.in_flight.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_MS)).await;
        }
        let remaining = self.shared.in_flight.len();
        if remaining > 0 {
            warn!(remaining, "Grace period expired with tasks still in flight");
        }

        let cleared = self.shared.queue.clear();
        if cleared > 0 {
            debug!(cleared, "Cleared queued tasks; they remain pending in the store");
        }

        self.shared
            .emit(RuntimeEvent::RuntimeStopped {
                timestamp: chrono::Utc::now().timestamp_millis(),
            })
            .await;
        info!("Agent task runtime stopped");
        Ok(())
    }

    /// Submit a request to run an agent. Returns the created task, or the
    /// existing one when the idempotency key matches a prior submission in
    /// the same organization.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Task, RuntimeError> {
        let SubmitRequest {
            agent_id,
            inputs,
            context,
        } = request;

        let Some(spec) = self.shared.registry.describe(&agent_id).await else {
            return Err(RuntimeError::AgentNotFound { agent_id });
        };

        if let Some(key) = &context.idempotency_key {
            let index_key =
                RuntimeShared::idempotency_index_key(&context.organization_id, key);
            if let Some(existing_id) = self
                .shared
                .idempotency
                .get(&index_key)
                .map(|entry| entry.value().clone())
            {
                if let Some(task) = self.shared.find_in_memory(&existing_id) {
                    debug!(task_id = %task.id, "Submission deduplicated by idempotency key");
                    return Ok(task);
                }
                if let Some(task) = self.shared.store.find_by_id(&existing_id).await? {
                    return Ok(task);
                }
            }
            // A prior task may have completed and left memory entirely.
            if let Some(task) = self
                .shared
                .store
                .find_by_idempotency_key(key, &context.organization_id)
                .await?
            {
                self.shared.idempotency.insert(index_key, task.id.clone());
                debug!(task_id = %task.id, "Submission deduplicated from durable storage");
                return Ok(task);
            }
        }

        let priority = context.priority.unwrap_or(spec.priority);
        let timeout_ms = spec
            .timeout_ms
            .unwrap_or(self.shared.config.default_timeout_ms);
        let task = Task::new(
            agent_id,
            inputs,
            &context,
            priority,
            spec.dependencies,
            timeout_ms,
            self.shared.config.max_retries,
        );

        if let Some(key) = &context.idempotency_key {
            self.shared.idempotency.insert(
                RuntimeShared::idempotency_index_key(&task.organization_id, key),
                task.id.clone(),
            );
        }
        self.shared.queue.push(task.clone());
        info!(
            task_id = %task.id,
            agent_id = %task.agent_id,
            organization_id = %task.organization_id,
            priority = ?task.priority,
            "Task submitted"
        );
        self.shared
            .emit(RuntimeEvent::TaskCreated { task: task.clone() })
            .await;
        self.shared.wake.notify_one();

        // The in-memory queue stays authoritative even if persistence fails;
        // the error is surfaced so the caller can retry (idempotency makes
        // that safe).
        if let Err(store_error) = self.shared.store.insert(&task).await {
            error!(task_id = %task.id, error = %store_error, "Failed to persist submitted task");
            return Err(RuntimeError::Store(store_error));
        }

        Ok(task)
    }

    /// Look a task up: in-flight set, then queue, then terminal history,
    /// then the durable store.
    pub async fn get_task_status(&self, id: &str) -> Result<Option<Task>, RuntimeError> {
        if let Some(task) = self.shared.find_in_memory(id) {
            return Ok(Some(task));
        }
        Ok(self.shared.store.find_by_id(id).await?)
    }

    /// Cancel a task. Returns whether the cancellation took effect; a task
    /// already in a terminal state is not cancellable.
    pub async fn cancel_task(&self, id: &str, reason: &str) -> Result<bool, RuntimeError> {
        if self.request_cancel_in_flight(id, reason) {
            info!(task_id = %id, reason = %reason, "Running task cancelled");
            return Ok(true);
        }

        if let Some(mut task) = self.shared.queue.remove(id) {
            task.cancel(reason);
            self.shared.metrics.record_cancellation(false);
            self.shared.finalize_terminal(task).await;
            info!(task_id = %id, reason = %reason, "Pending task cancelled");
            return Ok(true);
        }

        Ok(false)
    }

    /// Current counters and health classification.
    pub fn get_metrics(&self) -> RuntimeMetrics {
        self.shared.snapshot_metrics()
    }

    /// Flip an in-flight task to cancelled in bookkeeping and signal its
    /// supervisor. The agent invocation may keep running in the background;
    /// its result is discarded at commit time.
    fn request_cancel_in_flight(&self, id: &str, reason: &str) -> bool {
        let Some(entry) = self
            .shared
            .in_flight
            .get(id)
            .map(|entry| entry.value().clone())
        else {
            return false;
        };

        {
            let mut snapshot = entry.snapshot.lock();
            if snapshot.status.is_terminal() {
                return false;
            }
            snapshot.cancel(reason);
        }
        if let Some(cancel_tx) = entry.cancel_tx.lock().take() {
            let _ = cancel_tx.send(());
        }
        true
    }

    /// Reload persisted pending work and warm the dependency caches.
    async fn recover_from_store(&self) -> Result<(), RuntimeError> {
        let pending = self
            .shared
            .store
            .find_by_status(TaskStatus::Pending, RECOVERY_SCAN_LIMIT)
            .await?;
        let mut recovered = 0;
        for task in pending {
            if self.shared.queue.contains(&task.id)
                || self.shared.in_flight.contains_key(&task.id)
                || self.shared.history.contains(&task.id)
            {
                continue;
            }
            if let Some(key) = &task.idempotency_key {
                self.shared.idempotency.insert(
                    RuntimeShared::idempotency_index_key(&task.organization_id, key),
                    task.id.clone(),
                );
            }
            self.shared.queue.push(task);
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "Reloaded persisted pending tasks");
        }

        for task in self
            .shared
            .store
            .find_by_status(TaskStatus::Completed, RECOVERY_SCAN_LIMIT)
            .await?
        {
            self.shared.completed_ids.insert(task.id);
        }
        for status in [TaskStatus::Failed, TaskStatus::Cancelled] {
            for task in self
                .shared
                .store
                .find_by_status(status, RECOVERY_SCAN_LIMIT)
                .await?
            {
                self.shared.terminal_failed_ids.insert(task.id);
            }
        }
        Ok(())
    }
}
