//! `ExecutionCache`: the durable key-value/stream store facade (§4.3).
//!
//! Per-run state, the idempotent result cache, the distributed lock,
//! heartbeats, a bounded event log, and DLQ indices all go through one
//! trait so the DAG engine never needs to know whether it's talking to an
//! in-process map or a durable backend.

mod error;
mod lock;
mod memory;
mod trait_def;

pub use error::CacheError;
pub use lock::LockGuard;
pub use memory::{CacheConfig, InMemoryExecutionCache};
pub use trait_def::{DlqFilter, DlqStats, ExecutionCache};
