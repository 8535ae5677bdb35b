//! Deployment lifecycle: cron/event triggers, filtered-graph run spawning,
//! and heartbeat-based recovery sweeping (§4.7, §4.8).
//!
//! This crate sits above `flowgraph-engine`: it decides *when* and *with
//! what subgraph* a run starts, then hands off to the host's executor via
//! a callback rather than owning a `WorkflowExecutor` itself, so the two
//! concerns compose without a circular dependency.

mod collaborators;
mod deployment;
mod error;
mod recovery;
mod trigger;

pub use collaborators::{
    CredentialStore, InMemoryCredentialStore, InMemoryOutputStore, InMemoryParameterStore, Observer,
    OutputStore, ParameterStore,
};
pub use deployment::{CancelResult, DeployResult, DeploymentManager, OnRun};
pub use error::DeploymentError;
pub use recovery::{RecoveryCallback, RecoverySweeper};
pub use trigger::{
    build_cron_expression, find_cron_nodes, find_trigger_nodes, CronScheduler, TickCallback,
    TokioCronScheduler, TriggerManager,
};
