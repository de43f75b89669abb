//! Shared runtime state - the arena behind the dispatcher, supervisors and
//! facade.
//!
//! Ownership of a task is exclusive: it lives in exactly one of the admission
//! queue, the in-flight set, or the terminal history. Transfers happen in the
//! dispatcher's decision step and in terminal finalization.

use std::collections::VecDeque;
use std::sync::Arc;

use agentrun_models::{RuntimeEvent, RuntimeMetrics, Task, TaskStatus};
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::events::{BroadcastEventEmitter, TaskEventEmitter};
use crate::metrics::MetricsAggregator;
use crate::queue::AdmissionQueue;
use crate::registry::AgentRegistry;
use crate::retry::RetryPolicy;
use crate::store::TaskStore;

/// Bookkeeping for one task handed to a supervisor.
///
/// The snapshot mutex is the arbiter between cancellation and the natural
/// outcome: whoever writes a terminal status into it first wins, and the
/// later party observes a terminal snapshot and stands down.
pub(crate) struct InFlightEntry {
    pub snapshot: Mutex<Task>,
    pub cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl InFlightEntry {
    pub fn new(task: Task) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let entry = Arc::new(Self {
            snapshot: Mutex::new(task),
            cancel_tx: Mutex::new(Some(cancel_tx)),
        });
        (entry, cancel_rx)
    }
}

/// Bounded in-memory log of terminal tasks, oldest evicted first. Purely for
/// introspection; durable state lives in the task store regardless.
pub(crate) struct HistoryLog {
    order: Mutex<VecDeque<String>>,
    tasks: DashMap<String, Task>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: Mutex::new(VecDeque::new()),
            tasks: DashMap::new(),
            capacity,
        }
    }

    pub fn push(&self, task: Task) {
        let mut order = self.order.lock();
        if !self.tasks.contains_key(&task.id) {
            order.push_back(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
        while order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.tasks.remove(&evicted);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.lock().len()
    }
}

/// What a periodic cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CleanupReport {
    pub idempotency_pruned: usize,
    pub history_retained: usize,
}

/// Everything the runtime's moving parts share.
pub(crate) struct RuntimeShared {
    pub config: RuntimeConfig,
    pub registry: Arc<dyn AgentRegistry>,
    pub store: Arc<dyn TaskStore>,
    pub events: Arc<BroadcastEventEmitter>,
    pub emitters: RwLock<Vec<Arc<dyn TaskEventEmitter>>>,
    /// Wakes the dispatcher when the queue or capacity changes.
    pub wake: Notify,
    pub queue: AdmissionQueue,
    pub in_flight: DashMap<String, Arc<InFlightEntry>>,
    pub history: HistoryLog,
    /// Live idempotency index: "{organization}:{key}" -> task id.
    pub idempotency: DashMap<String, String>,
    /// Dependency cache: ids of tasks known to have completed.
    pub completed_ids: DashSet<String>,
    /// Ids of tasks that reached `failed`/`cancelled` - dependencies on these
    /// can never be satisfied.
    pub terminal_failed_ids: DashSet<String>,
    pub metrics: MetricsAggregator,
    pub retry: RetryPolicy,
}

impl RuntimeShared {
    pub fn new(
        config: RuntimeConfig,
        registry: Arc<dyn AgentRegistry>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        let events = Arc::new(BroadcastEventEmitter::new(256));
        let retry = RetryPolicy::new(config.retry_delay_ms);
        let history = HistoryLog::new(config.max_execution_history);
        Self {
            config,
            registry,
            store,
            emitters: RwLock::new(vec![events.clone()]),
            events,
            wake: Notify::new(),
            queue: AdmissionQueue::new(),
            in_flight: DashMap::new(),
            history,
            idempotency: DashMap::new(),
            completed_ids: DashSet::new(),
            terminal_failed_ids: DashSet::new(),
            metrics: MetricsAggregator::new(),
            retry,
        }
    }

    pub fn idempotency_index_key(organization_id: &str, key: &str) -> String {
        format!("{}:{}", organization_id, key)
    }

    /// Attach an additional notification collaborator.
    pub fn add_emitter(&self, emitter: Arc<dyn TaskEventEmitter>) {
        self.emitters.write().push(emitter);
    }

    /// Fan an event out to every emitter, fire-and-forget.
    pub async fn emit(&self, event: RuntimeEvent) {
        let emitters = self.emitters.read().clone();
        for emitter in emitters {
            emitter.emit(event.clone()).await;
        }
    }

    /// Persist a task mutation. A store failure here must not disturb
    /// scheduling, so it is logged and swallowed.
    pub async fn persist_update(&self, task: &Task) {
        if let Err(error) = self.store.update(task).await {
            warn!(task_id = %task.id, error = %error, "Failed to persist task update");
        }
    }

    /// Look a task up in the in-memory views only.
    pub fn find_in_memory(&self, id: &str) -> Option<Task> {
        if let Some(entry) = self.in_flight.get(id) {
            return Some(entry.snapshot.lock().clone());
        }
        if let Some(task) = self.queue.get(id) {
            return Some(task);
        }
        self.history.get(id)
    }

    pub fn snapshot_metrics(&self) -> RuntimeMetrics {
        self.metrics
            .snapshot(self.in_flight.len() as u64, self.queue.len() as u64)
    }

    /// Commit a terminal task: drop it from the in-flight set, update the
    /// dependency caches, append to history, persist and announce. Metrics
    /// for the outcome are recorded by the caller, which knows whether an
    /// attempt actually ran.
    pub async fn finalize_terminal(&self, task: Task) {
        debug_assert!(task.is_terminal());
        self.in_flight.remove(&task.id);
        match task.status {
            TaskStatus::Completed => {
                self.completed_ids.insert(task.id.clone());
            }
            TaskStatus::Failed | TaskStatus::Cancelled => {
                self.terminal_failed_ids.insert(task.id.clone());
            }
            _ => {}
        }
        self.history.push(task.clone());
        self.persist_update(&task).await;

        let event = match task.status {
            TaskStatus::Completed => RuntimeEvent::TaskCompleted { task },
            TaskStatus::Failed => RuntimeEvent::TaskFailed { task },
            TaskStatus::Cancelled => {
                let reason = task.error.clone().unwrap_or_default();
                RuntimeEvent::TaskCancelled { task, reason }
            }
            _ => return,
        };
        self.emit(event).await;
    }

    /// Periodic cleanup: prune live idempotency entries whose task has left
    /// memory (the durable index still covers them).
    pub fn run_cleanup(&self) -> CleanupReport {
        let mut pruned = 0;
        self.idempotency.retain(|_, task_id| {
            let alive = self.in_flight.contains_key(task_id)
                || self.queue.contains(task_id)
                || self.history.contains(task_id);
            if !alive {
                pruned += 1;
            }
            alive
        });

        let report = CleanupReport {
            idempotency_pruned: pruned,
            history_retained: self.history.len(),
        };
        debug!(
            idempotency_pruned = report.idempotency_pruned,
            history_retained = report.history_retained,
            "Cleanup pass finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_models::{Payload, TaskContext, TaskPriority};

    fn make_task() -> Task {
        let context = TaskContext {
            organization_id: "org-1".to_string(),
            user_id: "user-1".to_string(),
            correlation_id: "corr-1".to_string(),
            ..Default::default()
        };
        Task::new(
            "agent-1".to_string(),
            Payload::new(),
            &context,
            TaskPriority::Medium,
            vec![],
            30_000,
            3,
        )
    }

    #[test]
    fn test_history_evicts_oldest_first() {
        let history = HistoryLog::new(2);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut task = make_task();
            task.cancel("test");
            ids.push(task.id.clone());
            history.push(task);
        }

        assert_eq!(history.len(), 2);
        assert!(history.get(&ids[0]).is_none());
        assert!(history.get(&ids[1]).is_some());
        assert!(history.get(&ids[2]).is_some());
    }

    #[test]
    fn test_history_replaces_without_duplicating() {
        let history = HistoryLog::new(5);

        let mut task = make_task();
        task.fail("first".to_string(), None);
        history.push(task.clone());
        history.push(task.clone());

        assert_eq!(history.len(), 1);
        assert_eq!(history.get(&task.id).unwrap().error.as_deref(), Some("first"));
    }

    #[test]
    fn test_cleanup_prunes_stale_idempotency_entries() {
        use crate::testkit::{MemoryTaskStore, StaticAgentRegistry};

        let shared = RuntimeShared::new(
            RuntimeConfig::default(),
            Arc::new(StaticAgentRegistry::new()),
            Arc::new(MemoryTaskStore::new()),
        );

        // One entry whose task still lives in the queue, one orphan
        let task = make_task();
        shared
            .idempotency
            .insert("org-1:alive".to_string(), task.id.clone());
        shared.queue.push(task);
        shared
            .idempotency
            .insert("org-1:gone".to_string(), "evicted-task".to_string());

        let report = shared.run_cleanup();
        assert_eq!(report.idempotency_pruned, 1);
        assert_eq!(shared.idempotency.len(), 1);
        assert!(shared.idempotency.contains_key("org-1:alive"));
    }
}
