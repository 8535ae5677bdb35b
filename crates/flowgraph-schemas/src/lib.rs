//! Data model for the workflow orchestration engine.
//!
//! This crate defines the wire/persisted shapes shared by every other
//! `flowgraph-*` crate: the workflow template (`Node`, `Edge`), the per-run
//! state (`ExecutionContext`, `NodeExecution`), retry policy, DLQ entries,
//! and deployment state. Nothing here performs I/O or scheduling — those
//! live in `flowgraph-cache`, `flowgraph-events`, `flowgraph-engine`, and
//! `flowgraph-deploy`.

mod deployment;
mod dlq;
mod error;
mod execution;
mod hashing;
mod node;
mod retry;

pub use deployment::{DeploymentSettings, DeploymentState, ExecutorMode, TriggerInfo};
pub use dlq::DlqEntry;
pub use error::{NodeError, WorkflowError};
pub use execution::{ExecutionContext, ExecutionErrorEntry, NodeExecution, TaskStatus, WorkflowStatus};
pub use hashing::{generate_cache_key, hash_inputs};
pub use node::{
    Condition, ConditionOperator, Edge, Node, NodeTypeClass, CONFIG_TARGET_HANDLES,
};
pub use retry::{default_retry_policy, RetryPolicy};
