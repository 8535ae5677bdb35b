//! The dynamic node/edge DAG executor.
//!
//! Given a workflow template (`Node`/`Edge` from `flowgraph-schemas`) and a
//! registry of node-type handlers, `WorkflowExecutor` runs it to completion:
//! layer analysis, continuous first-completion scheduling, conditional-edge
//! evaluation, per-node retry and result caching, and dead-letter capture on
//! exhaustion.

mod condition;
mod executor;
mod handler;
mod resolve;

pub use condition::{evaluate_condition, evaluate_conditions, get_nested_value};
pub use executor::{compute_execution_layers, ExecutorConfig, WorkflowExecutor, WorkflowRunResult};
pub use handler::{HandlerOutcome, HandlerRegistry, NodeExecContext, NodeHandler};
pub use resolve::ParameterResolver;
