use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use tracing::instrument;

use flowgraph_schemas::{DlqEntry, ExecutionContext, WorkflowStatus};

use crate::trait_def::{DlqFilter, DlqStats, ExecutionCache};
use crate::{CacheError, LockGuard};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// TTL/bound knobs for the in-memory cache (§4.3 defaults: 1h / 5min /
/// 7 days / 1000 entries). Read from the environment by the CLI binary via
/// `dotenvy` + `std::env`, matching the teacher's config-loading style.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub result_ttl: Duration,
    pub heartbeat_ttl: Duration,
    pub dlq_ttl: Duration,
    pub event_log_max_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(3600),
            heartbeat_ttl: Duration::from_secs(300),
            dlq_ttl: Duration::from_secs(7 * 24 * 3600),
            event_log_max_len: 1000,
        }
    }
}

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn fresh(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// In-process fallback backend for `ExecutionCache` (§4.3 "degraded
/// mode"). TTL and stream-length bounds are enforced lazily on read/write
/// rather than via a background sweep, since nothing here is guaranteed a
/// runtime handle at construction time.
pub struct InMemoryExecutionCache {
    config: CacheConfig,
    state: DashMap<String, ExecutionContext>,
    active: DashMap<String, ()>,
    results: DashMap<String, Expiring<Value>>,
    locks: Arc<DashMap<String, String>>,
    heartbeats: DashMap<String, Expiring<DateTime<Utc>>>,
    events: DashMap<String, Vec<(String, Value)>>,
    dlq: DashMap<String, Expiring<DlqEntry>>,
}

impl InMemoryExecutionCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            state: DashMap::new(),
            active: DashMap::new(),
            results: DashMap::new(),
            locks: Arc::new(DashMap::new()),
            heartbeats: DashMap::new(),
            events: DashMap::new(),
            dlq: DashMap::new(),
        }
    }

    fn result_key(execution_id: &str, node_id: &str, input_hash: &str) -> String {
        format!("result:{execution_id}:{node_id}:{input_hash}")
    }

    fn heartbeat_key(execution_id: &str, node_id: &str) -> String {
        format!("heartbeat:{execution_id}:{node_id}")
    }
}

impl Default for InMemoryExecutionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionCache for InMemoryExecutionCache {
    #[instrument(skip(self, ctx), fields(execution_id = %ctx.execution_id))]
    async fn save_execution_state(&self, ctx: &ExecutionContext) {
        if ctx.status == WorkflowStatus::Running {
            self.active.insert(ctx.execution_id.clone(), ());
        } else if ctx.status.is_terminal() {
            self.active.remove(&ctx.execution_id);
        }
        self.state.insert(ctx.execution_id.clone(), ctx.clone());
    }

    async fn load_execution_state(&self, execution_id: &str) -> Option<ExecutionContext> {
        self.state.get(execution_id).map(|e| e.clone())
    }

    async fn active_executions(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    async fn remove_active_execution(&self, execution_id: &str) {
        self.active.remove(execution_id);
    }

    async fn get_cached_result(&self, execution_id: &str, node_id: &str, input_hash: &str) -> Option<Value> {
        let key = Self::result_key(execution_id, node_id, input_hash);
        let entry = self.results.get(&key)?;
        if entry.is_expired() {
            drop(entry);
            self.results.remove(&key);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn set_cached_result(&self, execution_id: &str, node_id: &str, input_hash: &str, result: Value) {
        let key = Self::result_key(execution_id, node_id, input_hash);
        self.results
            .insert(key, Expiring::fresh(result, Some(self.config.result_ttl)));
    }

    #[instrument(skip(self))]
    async fn distributed_lock(&self, name: &str, timeout: Duration) -> Result<LockGuard, CacheError> {
        let token: String = {
            let mut rng = rand::thread_rng();
            (0..16).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
        };
        let deadline = Instant::now() + timeout;

        loop {
            let acquired = {
                let locks = &self.locks;
                if !locks.contains_key(name) {
                    locks.insert(name.to_string(), token.clone());
                    true
                } else {
                    false
                }
            };

            if acquired {
                let locks = Arc::clone(&self.locks);
                let name_owned = name.to_string();
                let token_owned = token.clone();
                return Ok(LockGuard::new(name_owned.clone(), move || {
                    // Token-checked release: only remove if we still hold it.
                    if let Some(held) = locks.get(&name_owned) {
                        if *held == token_owned {
                            drop(held);
                            locks.remove(&name_owned);
                        }
                    }
                }));
            }

            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout {
                    name: name.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn update_heartbeat(&self, execution_id: &str, node_id: &str) {
        let key = Self::heartbeat_key(execution_id, node_id);
        self.heartbeats
            .insert(key, Expiring::fresh(Utc::now(), Some(self.config.heartbeat_ttl)));
    }

    async fn get_heartbeat(&self, execution_id: &str, node_id: &str) -> Option<DateTime<Utc>> {
        let key = Self::heartbeat_key(execution_id, node_id);
        let entry = self.heartbeats.get(&key)?;
        if entry.is_expired() {
            drop(entry);
            self.heartbeats.remove(&key);
            return None;
        }
        Some(entry.value)
    }

    async fn add_event(&self, execution_id: &str, event_type: &str, data: Value) {
        let mut entry = self.events.entry(execution_id.to_string()).or_default();
        entry.push((event_type.to_string(), data));
        let len = entry.len();
        if len > self.config.event_log_max_len {
            entry.drain(0..len - self.config.event_log_max_len);
        }
    }

    async fn get_events(&self, execution_id: &str) -> Vec<(String, Value)> {
        self.events
            .get(execution_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    async fn add_to_dlq(&self, entry: DlqEntry) {
        self.dlq
            .insert(entry.id.to_string(), Expiring::fresh(entry, Some(self.config.dlq_ttl)));
    }

    async fn get_dlq_entry(&self, id: &str) -> Option<DlqEntry> {
        let entry = self.dlq.get(id)?;
        if entry.is_expired() {
            drop(entry);
            self.dlq.remove(id);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn list_dlq(&self, filter: DlqFilter, limit: usize) -> Vec<DlqEntry> {
        let mut entries: Vec<DlqEntry> = self
            .dlq
            .iter()
            .filter(|e| !e.value().is_expired())
            .map(|e| e.value().value.clone())
            .filter(|e| {
                filter
                    .workflow_id
                    .as_ref()
                    .map(|wf| &e.workflow_id == wf)
                    .unwrap_or(true)
                    && filter
                        .node_type
                        .as_ref()
                        .map(|t| &e.node_type == t)
                        .unwrap_or(true)
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        entries
    }

    async fn remove_from_dlq(&self, id: &str) -> bool {
        self.dlq.remove(id).is_some()
    }

    async fn update_dlq_entry(&self, entry: DlqEntry) {
        self.dlq
            .insert(entry.id.to_string(), Expiring::fresh(entry, Some(self.config.dlq_ttl)));
    }

    async fn purge_dlq(&self, filter: DlqFilter) -> usize {
        let matching: Vec<String> = self
            .dlq
            .iter()
            .filter(|e| {
                filter
                    .workflow_id
                    .as_ref()
                    .map(|wf| &e.value().value.workflow_id == wf)
                    .unwrap_or(true)
                    && filter
                        .node_type
                        .as_ref()
                        .map(|t| &e.value().value.node_type == t)
                        .unwrap_or(true)
            })
            .map(|e| e.key().clone())
            .collect();
        for key in &matching {
            self.dlq.remove(key);
        }
        matching.len()
    }

    async fn dlq_stats(&self) -> DlqStats {
        let mut by_workflow: HashMap<String, usize> = HashMap::new();
        let mut by_node_type: HashMap<String, usize> = HashMap::new();
        let mut total = 0;
        for entry in self.dlq.iter() {
            if entry.value().is_expired() {
                continue;
            }
            total += 1;
            *by_workflow.entry(entry.value().value.workflow_id.clone()).or_default() += 1;
            *by_node_type.entry(entry.value().value.node_type.clone()).or_default() += 1;
        }
        DlqStats {
            total,
            by_workflow: by_workflow.into_iter().collect(),
            by_node_type: by_node_type.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_schemas::NodeExecution;
    use std::collections::HashMap as StdHashMap;

    fn ctx(execution_id: &str, status: WorkflowStatus) -> ExecutionContext {
        let mut c = ExecutionContext::create("wf", "default", vec![], vec![], |_| {
            flowgraph_schemas::NodeTypeClass::Executable
        });
        c.execution_id = execution_id.to_string();
        c.status = WorkflowStatus::Pending;
        c.set_status(status);
        c
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let cache = InMemoryExecutionCache::new();
        let c = ctx("exec-1", WorkflowStatus::Running);
        cache.save_execution_state(&c).await;

        let loaded = cache.load_execution_state("exec-1").await.unwrap();
        assert_eq!(loaded.execution_id, "exec-1");
        assert_eq!(cache.active_executions().await, vec!["exec-1".to_string()]);
    }

    #[tokio::test]
    async fn terminal_status_drops_from_active_set() {
        let cache = InMemoryExecutionCache::new();
        cache.save_execution_state(&ctx("exec-2", WorkflowStatus::Running)).await;
        cache.save_execution_state(&ctx("exec-2", WorkflowStatus::Completed)).await;
        assert!(cache.active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn result_cache_hits_and_misses() {
        let cache = InMemoryExecutionCache::new();
        assert!(cache.get_cached_result("e", "n", "h").await.is_none());
        cache
            .set_cached_result("e", "n", "h", serde_json::json!({"v": 1}))
            .await;
        assert_eq!(
            cache.get_cached_result("e", "n", "h").await.unwrap()["v"],
            1
        );
    }

    #[tokio::test]
    async fn lock_is_exclusive_and_releases_on_drop() {
        let cache = InMemoryExecutionCache::new();
        let guard = cache
            .distributed_lock("wf:decide", Duration::from_millis(50))
            .await
            .unwrap();

        let second = cache.distributed_lock("wf:decide", Duration::from_millis(50)).await;
        assert!(matches!(second, Err(CacheError::LockTimeout { .. })));

        drop(guard);
        assert!(cache
            .distributed_lock("wf:decide", Duration::from_millis(50))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn dlq_round_trips_with_filtering() {
        let cache = InMemoryExecutionCache::new();
        let node_exec = NodeExecution::new("n1", "httpRequest");
        let entry = DlqEntry::create("e1", "wf1", &node_exec, StdHashMap::new());
        cache.add_to_dlq(entry.clone()).await;

        let all = cache
            .list_dlq(crate::DlqFilter::default(), 10)
            .await;
        assert_eq!(all.len(), 1);

        let filtered = cache
            .list_dlq(
                crate::DlqFilter {
                    workflow_id: Some("other".to_string()),
                    node_type: None,
                },
                10,
            )
            .await;
        assert!(filtered.is_empty());

        assert!(cache.remove_from_dlq(&entry.id.to_string()).await);
        assert!(cache.get_dlq_entry(&entry.id.to_string()).await.is_none());
    }
}
