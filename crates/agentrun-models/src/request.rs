//! Boundary contracts for submission and agent execution.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::task::{Payload, TaskPriority};

/// Caller context attached to a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaskContext {
    pub organization_id: String,
    pub user_id: String,
    /// Caller-supplied tracing token.
    pub correlation_id: String,
    /// Makes the submission safe to retry: a second submit with the same key
    /// and organization returns the existing task.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Overrides the priority declared by the agent registry.
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// Spending ceiling carried to the agent, not enforced by the runtime.
    #[serde(default)]
    pub budget_eur: Option<f64>,
}

/// A request to run a named agent.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubmitRequest {
    pub agent_id: String,
    #[ts(type = "Record<string, unknown>")]
    pub inputs: Payload,
    pub context: TaskContext,
}

/// Scheduling attributes an agent declares in the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AgentSpec {
    #[serde(default)]
    pub priority: TaskPriority,
    /// Per-attempt budget; the runtime default applies when absent.
    #[serde(default)]
    #[ts(type = "number | null")]
    pub timeout_ms: Option<u64>,
    /// Task ids copied onto every task created for this agent.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Context handed to the agent registry for one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExecutionContext {
    pub task_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub correlation_id: String,
    #[serde(default)]
    pub budget_eur: Option<f64>,
}

/// Result of a successful agent execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AgentOutcome {
    #[ts(type = "Record<string, unknown>")]
    pub outputs: Payload,
    #[serde(default)]
    pub cost_eur: Option<f64>,
    /// Duration reported by the agent; the supervisor falls back to its own
    /// measurement when absent.
    #[serde(default)]
    #[ts(type = "number | null")]
    pub execution_time_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_deserializes_with_defaults() {
        let json = r#"{"organization_id":"org-1","user_id":"u-1","correlation_id":"c-1"}"#;
        let ctx: TaskContext = serde_json::from_str(json).unwrap();
        assert!(ctx.idempotency_key.is_none());
        assert!(ctx.priority.is_none());
        assert!(ctx.budget_eur.is_none());
    }

    #[test]
    fn test_agent_spec_defaults() {
        let spec: AgentSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.priority, TaskPriority::Medium);
        assert!(spec.timeout_ms.is_none());
        assert!(spec.dependencies.is_empty());
    }

    #[test]
    fn test_priority_override_round_trip() {
        let ctx = TaskContext {
            organization_id: "org-1".to_string(),
            priority: Some(TaskPriority::Critical),
            ..Default::default()
        };
        let json = serde_json::to_string(&ctx).unwrap();
        let back: TaskContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.priority, Some(TaskPriority::Critical));
    }
}
