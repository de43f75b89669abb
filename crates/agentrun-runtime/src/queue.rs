//! Admission queue - pending tasks ordered by priority, then age.
//!
//! Ordering key is `(inverted priority rank, created_at, submission seq)` in
//! a BTreeMap, so an in-order walk yields the highest priority first and FIFO
//! within a priority. Tasks whose declared dependencies are incomplete, or
//! whose backoff schedule lies in the future, are invisible to selection.

use agentrun_models::Task;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    /// `3 - priority.rank()`, so critical sorts first.
    rank_inv: u8,
    created_at: i64,
    /// Monotonic submission counter breaking equal-millisecond ties.
    seq: u64,
}

/// Result of one selection pass.
#[derive(Debug)]
pub enum PopOutcome {
    /// Highest-priority admissible task, removed from the queue.
    Ready(Task),
    /// A task whose dependency reached a terminal state other than
    /// `completed` - it can never become admissible.
    DependencyFailed { task: Task, dependency: String },
}

#[derive(Default)]
struct QueueInner {
    entries: BTreeMap<QueueKey, Task>,
    by_id: HashMap<String, QueueKey>,
}

/// Holds tasks not yet dispatched. Mutated only by the dispatcher and the
/// facade; read by metrics.
pub struct AdmissionQueue {
    inner: Mutex<QueueInner>,
    seq: AtomicU64,
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            seq: AtomicU64::new(0),
        }
    }

    /// Insert a pending task.
    pub fn push(&self, task: Task) {
        let key = QueueKey {
            rank_inv: 3 - task.priority.rank(),
            created_at: task.created_at,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };
        let mut inner = self.inner.lock();
        inner.by_id.insert(task.id.clone(), key);
        inner.entries.insert(key, task);
    }

    /// Select and remove the next task to run.
    ///
    /// Walks the queue in priority/age order. A task waiting on a dependency
    /// that terminally failed is removed and reported so the caller can
    /// degrade it instead of leaving it stuck forever.
    pub fn pop_admissible(
        &self,
        now_ms: i64,
        completed: &DashSet<String>,
        terminal_failed: &DashSet<String>,
    ) -> Option<PopOutcome> {
        enum Selected {
            Ready,
            DepFailed(String),
        }

        let mut inner = self.inner.lock();

        let mut hit: Option<(QueueKey, Selected)> = None;
        for (key, task) in inner.entries.iter() {
            if let Some(dep) = task
                .dependencies
                .iter()
                .find(|dep| terminal_failed.contains(dep.as_str()))
            {
                hit = Some((*key, Selected::DepFailed(dep.clone())));
                break;
            }
            if task.scheduled_at.is_some_and(|at| at > now_ms) {
                continue;
            }
            if task
                .dependencies
                .iter()
                .all(|dep| completed.contains(dep.as_str()))
            {
                hit = Some((*key, Selected::Ready));
                break;
            }
        }

        let (key, selected) = hit?;
        let task = inner.entries.remove(&key)?;
        inner.by_id.remove(&task.id);

        Some(match selected {
            Selected::Ready => PopOutcome::Ready(task),
            Selected::DepFailed(dependency) => PopOutcome::DependencyFailed { task, dependency },
        })
    }

    /// Remove a specific task, e.g. on cancellation.
    pub fn remove(&self, id: &str) -> Option<Task> {
        let mut inner = self.inner.lock();
        let key = inner.by_id.remove(id)?;
        inner.entries.remove(&key)
    }

    /// Clone of a queued task, for status lookups.
    pub fn get(&self, id: &str) -> Option<Task> {
        let inner = self.inner.lock();
        let key = inner.by_id.get(id)?;
        inner.entries.get(key).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all queued tasks, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.by_id.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_models::{Payload, TaskContext, TaskPriority};

    fn make_task(priority: TaskPriority, dependencies: Vec<String>) -> Task {
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
            priority,
            dependencies,
            30_000,
            3,
        )
    }

    fn pop_ready(queue: &AdmissionQueue, completed: &DashSet<String>) -> Option<Task> {
        let failed = DashSet::new();
        match queue.pop_admissible(i64::MAX, completed, &failed) {
            Some(PopOutcome::Ready(task)) => Some(task),
            Some(other) => panic!("unexpected outcome: {:?}", other),
            None => None,
        }
    }

    #[test]
    fn test_pop_follows_priority_order() {
        let queue = AdmissionQueue::new();
        let completed = DashSet::new();

        let low = make_task(TaskPriority::Low, vec![]);
        let critical = make_task(TaskPriority::Critical, vec![]);
        let medium = make_task(TaskPriority::Medium, vec![]);
        let (low_id, critical_id, medium_id) =
            (low.id.clone(), critical.id.clone(), medium.id.clone());

        queue.push(low);
        queue.push(critical);
        queue.push(medium);

        assert_eq!(pop_ready(&queue, &completed).unwrap().id, critical_id);
        assert_eq!(pop_ready(&queue, &completed).unwrap().id, medium_id);
        assert_eq!(pop_ready(&queue, &completed).unwrap().id, low_id);
        assert!(pop_ready(&queue, &completed).is_none());
    }

    #[test]
    fn test_fifo_within_equal_priority() {
        let queue = AdmissionQueue::new();
        let completed = DashSet::new();

        let first = make_task(TaskPriority::High, vec![]);
        let second = make_task(TaskPriority::High, vec![]);
        let (first_id, second_id) = (first.id.clone(), second.id.clone());

        queue.push(first);
        queue.push(second);

        assert_eq!(pop_ready(&queue, &completed).unwrap().id, first_id);
        assert_eq!(pop_ready(&queue, &completed).unwrap().id, second_id);
    }

    #[test]
    fn test_unmet_dependency_blocks_selection() {
        let queue = AdmissionQueue::new();
        let completed = DashSet::new();

        let task = make_task(TaskPriority::Critical, vec!["dep-1".to_string()]);
        queue.push(task);

        // Sole pending task, capacity available - still not selected
        assert!(pop_ready(&queue, &completed).is_none());
        assert_eq!(queue.len(), 1);

        completed.insert("dep-1".to_string());
        assert!(pop_ready(&queue, &completed).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_blocked_task_does_not_hide_lower_priority_work() {
        let queue = AdmissionQueue::new();
        let completed = DashSet::new();

        let blocked = make_task(TaskPriority::Critical, vec!["dep-1".to_string()]);
        let runnable = make_task(TaskPriority::Low, vec![]);
        let runnable_id = runnable.id.clone();

        queue.push(blocked);
        queue.push(runnable);

        assert_eq!(pop_ready(&queue, &completed).unwrap().id, runnable_id);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_failed_dependency_is_reported() {
        let queue = AdmissionQueue::new();
        let completed = DashSet::new();
        let failed = DashSet::new();
        failed.insert("dep-1".to_string());

        let task = make_task(TaskPriority::Medium, vec!["dep-1".to_string()]);
        let task_id = task.id.clone();
        queue.push(task);

        match queue.pop_admissible(i64::MAX, &completed, &failed) {
            Some(PopOutcome::DependencyFailed { task, dependency }) => {
                assert_eq!(task.id, task_id);
                assert_eq!(dependency, "dep-1");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_future_schedule_gates_admission() {
        let queue = AdmissionQueue::new();
        let completed = DashSet::new();
        let failed = DashSet::new();

        let mut task = make_task(TaskPriority::Medium, vec![]);
        let now = task.created_at;
        task.scheduled_at = Some(now + 60_000);
        queue.push(task);

        assert!(queue.pop_admissible(now, &completed, &failed).is_none());
        assert!(
            queue
                .pop_admissible(now + 60_000, &completed, &failed)
                .is_some()
        );
    }

    #[test]
    fn test_remove_and_get() {
        let queue = AdmissionQueue::new();

        let task = make_task(TaskPriority::Medium, vec![]);
        let id = task.id.clone();
        queue.push(task);

        assert!(queue.contains(&id));
        assert_eq!(queue.get(&id).unwrap().id, id);

        let removed = queue.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(!queue.contains(&id));
        assert!(queue.remove(&id).is_none());
    }

    #[test]
    fn test_clear_empties_queue() {
        let queue = AdmissionQueue::new();
        queue.push(make_task(TaskPriority::Low, vec![]));
        queue.push(make_task(TaskPriority::High, vec![]));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
