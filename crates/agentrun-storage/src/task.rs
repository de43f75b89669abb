//! Task storage - byte-level API for task persistence.
//!
//! Stores task records by id with two index tables: a status index using
//! `"{status}:{id}"` composite keys so status scans are prefix walks, and an
//! idempotency index mapping `"{organization}:{key}"` to a task id.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

const TASK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
/// Index table: "{status}:{id}" -> task_id (for listing tasks by status)
const STATUS_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("task_status_index");
/// Index table: "{organization}:{key}" -> task_id (for idempotent submits)
const IDEMPOTENCY_TABLE: TableDefinition<&str, &str> = TableDefinition::new("task_idempotency");

/// Every status value a task record can be indexed under.
const STATUSES: [&str; 5] = ["pending", "running", "completed", "failed", "cancelled"];

/// Low-level task storage with byte-level API
#[derive(Clone)]
pub struct TaskStorage {
    db: Arc<Database>,
}

impl TaskStorage {
    /// Create a new TaskStorage instance
    pub fn new(db: Arc<Database>) -> Result<Self> {
        // Initialize all tables
        let write_txn = db.begin_write()?;
        write_txn.open_table(TASK_TABLE)?;
        write_txn.open_table(STATUS_INDEX_TABLE)?;
        write_txn.open_table(IDEMPOTENCY_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store raw task data and refresh the status index within one
    /// transaction.
    pub fn put_task_raw(&self, id: &str, status: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TASK_TABLE)?;
            table.insert(id, data)?;

            let mut index = write_txn.open_table(STATUS_INDEX_TABLE)?;
            for old_status in STATUSES {
                if old_status != status {
                    let key = format!("{}:{}", old_status, id);
                    index.remove(key.as_str())?;
                }
            }
            let key = format!("{}:{}", status, id);
            index.insert(key.as_str(), id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get raw task data by ID
    pub fn get_task_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TASK_TABLE)?;

        if let Some(value) = table.get(id)? {
            Ok(Some(value.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// List raw task data for a status, up to `limit` records
    pub fn list_by_status_raw(&self, status: &str, limit: usize) -> Result<Vec<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(STATUS_INDEX_TABLE)?;
        let table = read_txn.open_table(TASK_TABLE)?;

        let prefix = format!("{}:", status);
        let mut tasks = Vec::new();

        for item in index.iter()? {
            if tasks.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if key.value().starts_with(&prefix)
                && let Some(data) = table.get(value.value())?
            {
                tasks.push(data.value().to_vec());
            }
        }

        Ok(tasks)
    }

    /// Record an idempotency mapping for a task
    pub fn put_idempotency_raw(&self, organization_id: &str, key: &str, task_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDEMPOTENCY_TABLE)?;
            let index_key = format!("{}:{}", organization_id, key);
            table.insert(index_key.as_str(), task_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up the task id recorded for an idempotency key
    pub fn get_idempotency_raw(&self, organization_id: &str, key: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDEMPOTENCY_TABLE)?;

        let index_key = format!("{}:{}", organization_id, key);
        if let Some(value) = table.get(index_key.as_str())? {
            Ok(Some(value.value().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Delete a task and its index entries
    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(TASK_TABLE)?;
            let existed = table.remove(id)?.is_some();

            let mut index = write_txn.open_table(STATUS_INDEX_TABLE)?;
            for status in STATUSES {
                let key = format!("{}:{}", status, id);
                index.remove(key.as_str())?;
            }

            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
