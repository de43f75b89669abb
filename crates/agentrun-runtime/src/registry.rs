//! Agent registry collaborator contract.
//!
//! The runtime never looks inside an agent: it asks the registry what an
//! agent declares (`describe`) and hands it work (`execute`). Implementations
//! are injected at construction.

use agentrun_models::{AgentOutcome, AgentSpec, ExecutionContext, Payload};
use anyhow::Result;
use async_trait::async_trait;

/// Resolves and runs named agents. Invoked as a black box.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Scheduling attributes declared for an agent, or `None` for an unknown
    /// id.
    async fn describe(&self, agent_id: &str) -> Option<AgentSpec>;

    /// Run one attempt. The call may be long-running and costly; the
    /// supervisor bounds it with the task's timeout.
    async fn execute(
        &self,
        agent_id: &str,
        inputs: &Payload,
        context: &ExecutionContext,
    ) -> Result<AgentOutcome>;
}
