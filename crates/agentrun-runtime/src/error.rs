//! Error taxonomy for the runtime's public surface.
//!
//! Execution failures are deliberately not represented here: they drive the
//! retry state machine and end up as `error` text on the task itself.

use thiserror::Error;

/// Errors surfaced by the runtime facade.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The submitted agent id is unknown to the registry. Rejected
    /// synchronously; no task is created.
    #[error("Agent '{agent_id}' not found in registry")]
    AgentNotFound { agent_id: String },

    /// Rejected at construction; prevents `start` from ever succeeding.
    #[error("Invalid runtime configuration: {0}")]
    InvalidConfig(String),

    #[error("Runtime is already running")]
    AlreadyRunning,

    #[error("Runtime is not running")]
    NotRunning,

    /// The task store collaborator failed. In-memory scheduling state is the
    /// source of truth and is never rolled back because of this.
    #[error("Task store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RuntimeError::AgentNotFound {
            agent_id: "billing-sync".to_string(),
        };
        assert!(err.to_string().contains("billing-sync"));

        let err = RuntimeError::Store(anyhow::anyhow!("disk full"));
        assert!(err.to_string().contains("disk full"));
    }
}
