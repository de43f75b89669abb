//! AgentRun Runtime - asynchronous agent task runtime.
//!
//! Accepts requests to run a named agent, schedules them fairly under a
//! concurrency ceiling, retries failures with backoff, deduplicates
//! submissions via idempotency keys, and exposes live metrics and health.
//!
//! # Architecture
//!
//! - `queue`: admission queue ordering pending tasks by priority then age,
//!   gating on dependencies
//! - `dispatcher`: the single control loop making every admission decision
//! - `supervisor`: one execution attempt, timeout enforcement and the retry
//!   state machine
//! - `metrics`: rolling counters and the derived health classification
//! - `runtime`: the `AgentTaskRuntime` facade with its start/stop lifecycle
//! - `registry` / `store` / `events`: collaborator traits for the agent
//!   registry, durable task store and notification sinks (dependency
//!   injected)
//!
//! # Usage
//!
//! ```ignore
//! use agentrun_runtime::{AgentTaskRuntime, RuntimeConfig, RedbTaskStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(RedbTaskStore::open("tasks.db")?);
//! let runtime = AgentTaskRuntime::new(RuntimeConfig::default(), registry, store)?;
//! runtime.start().await?;
//!
//! let task = runtime.submit(request).await?;
//! // ... later
//! let status = runtime.get_task_status(&task.id).await?;
//! runtime.stop().await?;
//! ```

pub mod config;
mod dispatcher;
pub mod error;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod runtime;
mod state;
pub mod store;
mod supervisor;
#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use events::{BroadcastEventEmitter, NoopEventEmitter, TaskEventEmitter};
pub use metrics::MetricsAggregator;
pub use queue::{AdmissionQueue, PopOutcome};
pub use registry::AgentRegistry;
pub use retry::RetryPolicy;
pub use runtime::AgentTaskRuntime;
pub use store::{RedbTaskStore, TaskStore};

// Re-export the model types the public API is spoken in.
pub use agentrun_models as models;
