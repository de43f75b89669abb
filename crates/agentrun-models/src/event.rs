//! Runtime event stream consumed by notification collaborators.
//!
//! Events are fire-and-forget, delivered at-least-once to local subscribers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::metrics::RuntimeMetrics;
use crate::task::Task;

/// Everything the runtime announces about tasks and its own lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type")]
pub enum RuntimeEvent {
    #[serde(rename = "task:created")]
    TaskCreated { task: Task },
    #[serde(rename = "task:started")]
    TaskStarted { task: Task },
    #[serde(rename = "task:completed")]
    TaskCompleted { task: Task },
    #[serde(rename = "task:failed")]
    TaskFailed { task: Task },
    #[serde(rename = "task:retry")]
    TaskRetry {
        task: Task,
        #[ts(type = "number")]
        delay_ms: u64,
    },
    #[serde(rename = "task:cancelled")]
    TaskCancelled { task: Task, reason: String },
    #[serde(rename = "runtime:started")]
    RuntimeStarted {
        #[ts(type = "number")]
        timestamp: i64,
    },
    #[serde(rename = "runtime:stopped")]
    RuntimeStopped {
        #[ts(type = "number")]
        timestamp: i64,
    },
    #[serde(rename = "runtime:health-check")]
    HealthCheck { metrics: RuntimeMetrics },
}

impl RuntimeEvent {
    /// The task this event refers to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            RuntimeEvent::TaskCreated { task }
            | RuntimeEvent::TaskStarted { task }
            | RuntimeEvent::TaskCompleted { task }
            | RuntimeEvent::TaskFailed { task }
            | RuntimeEvent::TaskRetry { task, .. }
            | RuntimeEvent::TaskCancelled { task, .. } => Some(&task.id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TaskContext;
    use crate::task::{Payload, TaskPriority};

    fn test_task() -> Task {
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
    fn test_event_tags_use_wire_names() {
        let task = test_task();
        let json = serde_json::to_string(&RuntimeEvent::TaskCreated { task: task.clone() }).unwrap();
        assert!(json.contains("\"type\":\"task:created\""));

        let json = serde_json::to_string(&RuntimeEvent::TaskRetry {
            task,
            delay_ms: 2000,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"task:retry\""));
        assert!(json.contains("\"delay_ms\":2000"));

        let json = serde_json::to_string(&RuntimeEvent::HealthCheck {
            metrics: RuntimeMetrics::default(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"runtime:health-check\""));
    }

    #[test]
    fn test_task_id_accessor() {
        let task = test_task();
        let id = task.id.clone();
        let event = RuntimeEvent::TaskCancelled {
            task,
            reason: "user request".to_string(),
        };
        assert_eq!(event.task_id(), Some(id.as_str()));
        assert_eq!(
            RuntimeEvent::RuntimeStarted { timestamp: 0 }.task_id(),
            None
        );
    }
}
