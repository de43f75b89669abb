//! Task store collaborator contract and the redb-backed implementation.
//!
//! Durable state lives behind the `TaskStore` trait; the in-memory queue and
//! in-flight set remain the source of truth for scheduling. The store exists
//! for durability and recovery after a restart.

use agentrun_models::{Task, TaskStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Durable task persistence. All methods are crash-recovery plumbing, not
/// scheduling state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<()>;
    async fn update(&self, task: &Task) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>>;
    async fn find_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>>;
    /// Idempotency lookup against durable storage, so a task that already
    /// completed and left memory still deduplicates.
    async fn find_by_idempotency_key(
        &self,
        key: &str,
        organization_id: &str,
    ) -> Result<Option<Task>>;
}

/// Typed task store wrapper around agentrun-storage.
#[derive(Clone)]
pub struct RedbTaskStore {
    inner: agentrun_storage::TaskStorage,
}

impl RedbTaskStore {
    pub fn new(inner: agentrun_storage::TaskStorage) -> Self {
        Self { inner }
    }

    /// Open (or create) a database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let storage = agentrun_storage::Storage::new(path)
            .with_context(|| format!("Failed to open task store at {}", path))?;
        Ok(Self::new(storage.tasks))
    }

    fn put(&self, task: &Task) -> Result<()> {
        let data = serde_json::to_vec(task)?;
        self.inner
            .put_task_raw(&task.id, task.status.as_str(), &data)
    }
}

#[async_trait]
impl TaskStore for RedbTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        self.put(task)?;
        if let Some(key) = &task.idempotency_key {
            self.inner
                .put_idempotency_raw(&task.organization_id, key, &task.id)?;
        }
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.put(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        match self.inner.get_task_raw(id)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn find_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>> {
        let raw_tasks = self.inner.list_by_status_raw(status.as_str(), limit)?;
        let mut tasks = Vec::with_capacity(raw_tasks.len());
        for data in raw_tasks {
            tasks.push(serde_json::from_slice(&data)?);
        }
        Ok(tasks)
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
        organization_id: &str,
    ) -> Result<Option<Task>> {
        match self.inner.get_idempotency_raw(organization_id, key)? {
            Some(task_id) => self.find_by_id(&task_id).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_models::{Payload, TaskContext, TaskPriority};
    use tempfile::tempdir;

    fn setup_store() -> (RedbTaskStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = RedbTaskStore::open(db_path.to_str().unwrap()).unwrap();
        (store, temp_dir)
    }

    fn test_task(idempotency_key: Option<&str>) -> Task {
        let context = TaskContext {
            organization_id: "org-1".to_string(),
            user_id: "user-1".to_string(),
            correlation_id: "corr-1".to_string(),
            idempotency_key: idempotency_key.map(|k| k.to_string()),
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

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let (store, _temp_dir) = setup_store();

        let task = test_task(None);
        store.insert(&task).await.unwrap();

        let found = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(found.id, task.id);
        assert_eq!(found.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_moves_status_index() {
        let (store, _temp_dir) = setup_store();

        let mut task = test_task(None);
        store.insert(&task).await.unwrap();

        task.start();
        let mut outputs = Payload::new();
        outputs.insert("ok".to_string(), serde_json::json!(true));
        task.complete(outputs, Some(0.1), 50);
        store.update(&task).await.unwrap();

        let pending = store.find_by_status(TaskStatus::Pending, 10).await.unwrap();
        assert!(pending.is_empty());

        let completed = store
            .find_by_status(TaskStatus::Completed, 10)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, task.id);
        assert_eq!(completed[0].cost_eur, Some(0.1));
    }

    #[tokio::test]
    async fn test_find_by_idempotency_key() {
        let (store, _temp_dir) = setup_store();

        let task = test_task(Some("k1"));
        store.insert(&task).await.unwrap();

        let found = store
            .find_by_idempotency_key("k1", "org-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, task.id);

        let miss = store.find_by_idempotency_key("k1", "org-2").await.unwrap();
        assert!(miss.is_none());

        let miss = store.find_by_idempotency_key("k2", "org-1").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_pending_survive_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let path = db_path.to_str().unwrap().to_string();

        let task = test_task(None);
        {
            let store = RedbTaskStore::open(&path).unwrap();
            store.insert(&task).await.unwrap();
        }

        let store = RedbTaskStore::open(&path).unwrap();
        let pending = store.find_by_status(TaskStatus::Pending, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, task.id);
    }
}
