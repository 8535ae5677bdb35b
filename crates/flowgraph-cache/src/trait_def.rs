use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use flowgraph_schemas::{DlqEntry, ExecutionContext};

use crate::{CacheError, LockGuard};

/// Optional filter for `list_dlq`/`purge_dlq`/`dlq_stats`.
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub workflow_id: Option<String>,
    pub node_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DlqStats {
    pub total: usize,
    pub by_workflow: Vec<(String, usize)>,
    pub by_node_type: Vec<(String, usize)>,
}

/// The durable key-value/stream store facade of §4.3.
///
/// All operations are fail-closed: a cache miss, a store outage, or a
/// serialization hiccup resolves to `None`/`false`/an empty collection and
/// is logged, never propagated as an error to the caller — except
/// `distributed_lock`, whose timeout is the one condition callers must
/// branch on.
#[async_trait]
pub trait ExecutionCache: Send + Sync {
    /// Atomically replace `execution:{id}:state`. On a save with a
    /// terminal `status`, implementations trim `executions:active` and set
    /// a 24h TTL on the remaining record.
    async fn save_execution_state(&self, ctx: &ExecutionContext);

    async fn load_execution_state(&self, execution_id: &str) -> Option<ExecutionContext>;

    /// `executions:active` — the set of currently-RUNNING execution ids.
    async fn active_executions(&self) -> Vec<String>;

    async fn remove_active_execution(&self, execution_id: &str);

    /// `result:{exec}:{node}:{input_hash}`, default TTL 1h.
    async fn get_cached_result(&self, execution_id: &str, node_id: &str, input_hash: &str) -> Option<Value>;

    async fn set_cached_result(
        &self,
        execution_id: &str,
        node_id: &str,
        input_hash: &str,
        result: Value,
    );

    /// `lock:{name}`, SET-NX-with-random-token semantics. Blocks
    /// cooperatively up to `timeout` before giving up.
    async fn distributed_lock(&self, name: &str, timeout: Duration) -> Result<LockGuard, CacheError>;

    /// `heartbeat:{exec}:{node}`, TTL 5 min default.
    async fn update_heartbeat(&self, execution_id: &str, node_id: &str);

    async fn get_heartbeat(&self, execution_id: &str, node_id: &str) -> Option<DateTime<Utc>>;

    /// Append-only, best-effort, bounded to roughly 1000 entries
    /// (`execution:{id}:events`).
    async fn add_event(&self, execution_id: &str, event_type: &str, data: Value);

    async fn get_events(&self, execution_id: &str) -> Vec<(String, Value)>;

    // -- DLQ CRUD (§4.3, 7-day TTL per entry) --

    async fn add_to_dlq(&self, entry: DlqEntry);

    async fn get_dlq_entry(&self, id: &str) -> Option<DlqEntry>;

    async fn list_dlq(&self, filter: DlqFilter, limit: usize) -> Vec<DlqEntry>;

    async fn remove_from_dlq(&self, id: &str) -> bool;

    async fn update_dlq_entry(&self, entry: DlqEntry);

    async fn purge_dlq(&self, filter: DlqFilter) -> usize;

    async fn dlq_stats(&self) -> DlqStats;
}
