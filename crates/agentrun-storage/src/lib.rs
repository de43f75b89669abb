//! AgentRun Storage - Low-level persistence layer.
//!
//! This crate provides the durable side of the task runtime, using redb as
//! the embedded database. It exposes byte-level APIs to avoid circular
//! dependencies with the model types; the typed wrapper lives in
//! `agentrun-runtime`.
//!
//! # Tables
//!
//! - `tasks` - Task records keyed by id
//! - `task_status_index` - `"{status}:{id}"` composite keys for status scans
//! - `task_idempotency` - `"{organization}:{key}"` to task id

pub mod task;

use anyhow::Result;
use redb::Database;
use std::sync::Arc;

pub use task::TaskStorage;

/// Central storage manager that initializes all storage subsystems.
pub struct Storage {
    #[allow(dead_code)]
    db: Arc<Database>,
    pub tasks: TaskStorage,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// Creates the database file if it doesn't exist and initializes all
    /// required tables.
    pub fn new(path: &str) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);
        let tasks = TaskStorage::new(db.clone())?;
        Ok(Self { db, tasks })
    }
}
