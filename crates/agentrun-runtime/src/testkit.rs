//! Test doubles for the runtime's collaborators.
//!
//! Scripted agents, an in-memory task store and a collecting event emitter,
//! for exercising scheduling behavior without real agents or a database.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agentrun_models::{
    AgentOutcome, AgentSpec, ExecutionContext, Payload, RuntimeEvent, Task, TaskStatus,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::events::TaskEventEmitter;
use crate::registry::AgentRegistry;
use crate::store::TaskStore;

/// Scripted behavior for one registered agent.
pub enum ScriptedBehavior {
    /// Sleep `delay_ms`, then succeed with the given outcome.
    Succeed {
        outcome: AgentOutcome,
        delay_ms: u64,
    },
    /// Sleep `delay_ms`, then fail with the given error.
    Fail { error: String, delay_ms: u64 },
    /// Fail `failures` times, then succeed with the outcome.
    FailThenSucceed {
        failures: Mutex<u32>,
        error: String,
        outcome: AgentOutcome,
    },
}

struct ScriptedAgent {
    spec: AgentSpec,
    behavior: ScriptedBehavior,
}

/// In-memory agent registry that records every execution it performs.
#[derive(Default)]
pub struct StaticAgentRegistry {
    agents: DashMap<String, Arc<ScriptedAgent>>,
    executed_task_ids: Mutex<Vec<String>>,
}

impl StaticAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_id: &str, spec: AgentSpec, behavior: ScriptedBehavior) {
        self.agents
            .insert(agent_id.to_string(), Arc::new(ScriptedAgent { spec, behavior }));
    }

    /// Task ids in the order they were handed to `execute`.
    pub fn executed_task_ids(&self) -> Vec<String> {
        self.executed_task_ids.lock().clone()
    }

    pub fn execution_count_for(&self, task_id: &str) -> usize {
        self.executed_task_ids
            .lock()
            .iter()
            .filter(|id| id.as_str() == task_id)
            .count()
    }
}

#[async_trait]
impl AgentRegistry for StaticAgentRegistry {
    async fn describe(&self, agent_id: &str) -> Option<AgentSpec> {
        self.agents.get(agent_id).map(|agent| agent.value().spec.clone())
    }

    async fn execute(
        &self,
        agent_id: &str,
        _inputs: &Payload,
        context: &ExecutionContext,
    ) -> Result<AgentOutcome> {
        let agent = self
            .agents
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow!("Agent '{}' not found", agent_id))?;

        self.executed_task_ids.lock().push(context.task_id.clone());

        match &agent.behavior {
            ScriptedBehavior::Succeed { outcome, delay_ms } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Ok(outcome.clone())
            }
            ScriptedBehavior::Fail { error, delay_ms } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Err(anyhow!("{}", error))
            }
            ScriptedBehavior::FailThenSucceed {
                failures,
                error,
                outcome,
            } => {
                let should_fail = {
                    let mut remaining = failures.lock();
                    if *remaining > 0 {
                        *remaining -= 1;
                        true
                    } else {
                        false
                    }
                };
                if should_fail {
                    Err(anyhow!("{}", error))
                } else {
                    Ok(outcome.clone())
                }
            }
        }
    }
}

/// Task store backed by maps; optionally made to fail writes.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, Task>,
    idempotency: DashMap<String, String>,
    fail_writes: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert/update fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(anyhow!("store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        self.check_writable()?;
        if let Some(key) = &task.idempotency_key {
            self.idempotency
                .insert(format!("{}:{}", task.organization_id, key), task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.check_writable()?;
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.value().status == status)
            .take(limit)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
        organization_id: &str,
    ) -> Result<Option<Task>> {
        let index_key = format!("{}:{}", organization_id, key);
        match self.idempotency.get(&index_key) {
            Some(task_id) => self.find_by_id(task_id.value()).await,
            None => Ok(None),
        }
    }
}

/// Emitter that records everything for later assertions.
#[derive(Default)]
pub struct CollectingEmitter {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl TaskEventEmitter for CollectingEmitter {
    async fn emit(&self, event: RuntimeEvent) {
        self.events.lock().push(event);
    }
}

/// An outcome with the given cost, reporting no execution time of its own.
pub fn outcome_with_cost(cost_eur: f64) -> AgentOutcome {
    AgentOutcome {
        outputs: Payload::new(),
        cost_eur: Some(cost_eur),
        execution_time_ms: None,
    }
}
