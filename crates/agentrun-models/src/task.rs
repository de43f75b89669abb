//! Task model - the unit of work and its lifecycle state.
//!
//! A task is one request to run an agent, with its own lifecycle independent
//! of other requests for the same agent. Status only moves forward through
//! the state machine; the single back-edge `running -> pending` is reserved
//! for retries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::request::TaskContext;

/// Opaque key-value mapping passed verbatim to and from agents.
pub type Payload = serde_json::Map<String, Value>;

/// Scheduling priority, ordered `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, TS, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Numeric rank for queue ordering (higher runs first).
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Medium => 1,
            TaskPriority::High => 2,
            TaskPriority::Critical => 3,
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq, Eq, Hash)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Stable string form, used for storage index keys.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// One request to run an agent.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Task {
    /// Unique identifier, generated at submission.
    pub id: String,
    /// Agent registry entry this task runs.
    pub agent_id: String,
    /// Tenant the task belongs to.
    pub organization_id: String,
    /// Submitting user.
    pub user_id: String,
    /// Caller-supplied tracing token.
    pub correlation_id: String,
    /// Deduplication token, unique per organization among retained tasks.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Inputs passed verbatim to the agent.
    #[ts(type = "Record<string, unknown>")]
    pub inputs: Payload,
    /// Outputs returned by the agent, present only after success.
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    pub outputs: Option<Payload>,
    pub priority: TaskPriority,
    /// Task ids that must reach `completed` before this task is admissible.
    /// Fixed at creation time.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Wall-clock budget for one execution attempt.
    #[ts(type = "number")]
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Attempts already consumed. Never exceeds `max_retries`.
    #[serde(default)]
    pub retry_count: u32,
    pub status: TaskStatus,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
    /// Earliest time the task may be dispatched; pushed forward by backoff.
    #[serde(default)]
    #[ts(type = "number | null")]
    pub scheduled_at: Option<i64>,
    #[serde(default)]
    #[ts(type = "number | null")]
    pub started_at: Option<i64>,
    #[serde(default)]
    #[ts(type = "number | null")]
    pub completed_at: Option<i64>,
    /// Failure or cancellation reason, set only in `failed`/`cancelled`.
    #[serde(default)]
    pub error: Option<String>,
    /// Spending ceiling from the submission context, carried to the agent.
    #[serde(default)]
    pub budget_eur: Option<f64>,
    /// Cost reported by the agent, set only for attempts that actually ran.
    #[serde(default)]
    pub cost_eur: Option<f64>,
    /// Duration of the terminal attempt, not summed across retries.
    #[serde(default)]
    #[ts(type = "number | null")]
    pub execution_time_ms: Option<i64>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Task {
    /// Create a new pending task from a submission.
    pub fn new(
        agent_id: String,
        inputs: Payload,
        context: &TaskContext,
        priority: TaskPriority,
        dependencies: Vec<String>,
        timeout_ms: u64,
        max_retries: u32,
    ) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            organization_id: context.organization_id.clone(),
            user_id: context.user_id.clone(),
            correlation_id: context.correlation_id.clone(),
            idempotency_key: context.idempotency_key.clone(),
            inputs,
            outputs: None,
            priority,
            dependencies,
            timeout_ms,
            max_retries,
            retry_count: 0,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            scheduled_at: Some(now),
            started_at: None,
            completed_at: None,
            error: None,
            budget_eur: context.budget_eur,
            cost_eur: None,
            execution_time_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the task as running for one execution attempt.
    pub fn start(&mut self) {
        let now = now_ms();
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Mark the task as completed with the agent's outputs.
    pub fn complete(&mut self, outputs: Payload, cost_eur: Option<f64>, execution_time_ms: i64) {
        let now = now_ms();
        self.status = TaskStatus::Completed;
        self.outputs = Some(outputs);
        self.cost_eur = cost_eur;
        self.execution_time_ms = Some(execution_time_ms);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Mark the task as permanently failed.
    pub fn fail(&mut self, error: String, execution_time_ms: Option<i64>) {
        let now = now_ms();
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.execution_time_ms = execution_time_ms;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Mark the task as cancelled. Terminal; never retried.
    pub fn cancel(&mut self, reason: &str) {
        let now = now_ms();
        self.status = TaskStatus::Cancelled;
        self.error = Some(reason.to_string());
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Send the task back to `pending` for another attempt after `delay_ms`.
    pub fn prepare_retry(&mut self, delay_ms: u64) {
        let now = now_ms();
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.scheduled_at = Some(now + delay_ms as i64);
        self.updated_at = now;
    }

    /// Whether another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
