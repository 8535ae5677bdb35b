//! Periodic recovery sweep for interrupted runs (§4.8), grounded on the
//! original's heartbeat-based `RecoveryService`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use flowgraph_cache::ExecutionCache;
use flowgraph_schemas::{TaskStatus, WorkflowStatus};

pub type RecoveryCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct RecoverySweeper {
    cache: Arc<dyn ExecutionCache>,
    heartbeat_timeout: Duration,
    sweep_interval: Duration,
    running: Arc<AtomicBool>,
    on_recovery: Mutex<Option<RecoveryCallback>>,
}

impl RecoverySweeper {
    /// Mirrors the original's defaults: 300s heartbeat timeout, 60s sweep
    /// interval.
    pub fn new(cache: Arc<dyn ExecutionCache>) -> Self {
        Self::with_config(cache, Duration::from_secs(300), Duration::from_secs(60))
    }

    pub fn with_config(cache: Arc<dyn ExecutionCache>, heartbeat_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            cache,
            heartbeat_timeout,
            sweep_interval,
            running: Arc::new(AtomicBool::new(false)),
            on_recovery: Mutex::new(None),
        }
    }

    pub fn set_recovery_callback(&self, callback: RecoveryCallback) {
        *self.on_recovery.lock() = Some(callback);
    }

    /// Spawns the sweep loop; returns its `JoinHandle` so a caller can
    /// await clean shutdown after `stop()`.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                heartbeat_timeout_secs = sweeper.heartbeat_timeout.as_secs(),
                sweep_interval_secs = sweeper.sweep_interval.as_secs(),
                "recovery sweeper started"
            );
            while sweeper.running.load(Ordering::SeqCst) {
                sweeper.sweep_once().await;
                tokio::time::sleep(sweeper.sweep_interval).await;
            }
            info!("recovery sweeper stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[instrument(skip(self))]
    async fn sweep_once(&self) {
        let active_ids = self.cache.active_executions().await;
        for execution_id in active_ids {
            self.check_execution(&execution_id).await;
        }
    }

    /// Loads one active execution, prunes it from the active set if it's
    /// gone or terminal, and otherwise checks every `running` node's
    /// heartbeat (falling back to `started_at` when no heartbeat was ever
    /// recorded) against `heartbeat_timeout`.
    async fn check_execution(&self, execution_id: &str) {
        let Some(ctx) = self.cache.load_execution_state(execution_id).await else {
            warn!(execution_id, "active execution has no persisted state, pruning");
            self.cache.remove_active_execution(execution_id).await;
            return;
        };

        if ctx.status.is_terminal() {
            self.cache.remove_active_execution(execution_id).await;
            return;
        }

        let now = Utc::now();
        let mut needs_recovery = false;
        for (node_id, node_exec) in &ctx.node_executions {
            if node_exec.status != TaskStatus::Running {
                continue;
            }

            let stale = match self.cache.get_heartbeat(execution_id, node_id).await {
                Some(last_heartbeat) => (now - last_heartbeat).to_std().unwrap_or_default() > self.heartbeat_timeout,
                None => {
                    let started = node_exec.started_at.unwrap_or(now);
                    (now - started).to_std().unwrap_or_default() > self.heartbeat_timeout
                }
            };

            if stale {
                warn!(execution_id, node_id, "node exceeded heartbeat timeout, marking for recovery");
                needs_recovery = true;
            }
        }

        if needs_recovery {
            let callback = self.on_recovery.lock().clone();
            if let Some(callback) = callback {
                info!(execution_id, "invoking recovery callback");
                callback(execution_id.to_string()).await;
            }
        }
    }

    /// Startup scan (§4.8): returns ids of `running` executions whose
    /// `updated_at` is older than `heartbeat_timeout`, for the host to
    /// queue recoveries for before accepting new work.
    pub async fn scan_on_startup(&self) -> Vec<String> {
        let active_ids = self.cache.active_executions().await;
        info!(active_count = active_ids.len(), "scanning for executions interrupted by a prior shutdown");

        let mut interrupted = Vec::new();
        let now = Utc::now();
        for execution_id in active_ids {
            let Some(ctx) = self.cache.load_execution_state(&execution_id).await else {
                continue;
            };
            if ctx.status != WorkflowStatus::Running {
                continue;
            }
            let age = (now - ctx.updated_at).to_std().unwrap_or_default();
            if age > self.heartbeat_timeout {
                interrupted.push(execution_id);
            }
        }
        interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_cache::InMemoryExecutionCache;
    use flowgraph_schemas::{Edge, ExecutionContext, Node, NodeData, NodeTypeClass};
    use std::sync::atomic::AtomicUsize;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "code".to_string(),
            data: NodeData::default(),
            pre_executed: false,
            trigger_output: None,
        }
    }

    #[tokio::test]
    async fn stuck_node_with_no_heartbeat_triggers_recovery_via_started_at_fallback() {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let mut ctx = ExecutionContext::create("wf", "default", vec![node("a")], vec![] as Vec<Edge>, |_| NodeTypeClass::Executable);
        ctx.set_status(WorkflowStatus::Running);
        ctx.set_node_status("a", TaskStatus::Running, None, None);
        ctx.node_executions.get_mut("a").unwrap().started_at = Some(Utc::now() - chrono::Duration::seconds(120));
        cache.save_execution_state(&ctx).await;

        let sweeper = RecoverySweeper::with_config(Arc::clone(&cache), Duration::from_secs(60), Duration::from_secs(1));
        let recovered = Arc::new(AtomicUsize::new(0));
        let recovered2 = Arc::clone(&recovered);
        sweeper.set_recovery_callback(Arc::new(move |_execution_id| {
            let recovered = Arc::clone(&recovered2);
            Box::pin(async move {
                recovered.fetch_add(1, Ordering::SeqCst);
            })
        }));

        sweeper.sweep_once().await;
        assert_eq!(recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_heartbeat_does_not_trigger_recovery() {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let mut ctx = ExecutionContext::create("wf", "default", vec![node("a")], vec![] as Vec<Edge>, |_| NodeTypeClass::Executable);
        ctx.set_status(WorkflowStatus::Running);
        ctx.set_node_status("a", TaskStatus::Running, None, None);
        cache.save_execution_state(&ctx).await;
        cache.update_heartbeat(&ctx.execution_id, "a").await;

        let sweeper = RecoverySweeper::with_config(Arc::clone(&cache), Duration::from_secs(300), Duration::from_secs(60));
        let recovered = Arc::new(AtomicUsize::new(0));
        let recovered2 = Arc::clone(&recovered);
        sweeper.set_recovery_callback(Arc::new(move |_| {
            let recovered = Arc::clone(&recovered2);
            Box::pin(async move {
                recovered.fetch_add(1, Ordering::SeqCst);
            })
        }));

        sweeper.sweep_once().await;
        assert_eq!(recovered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn terminal_execution_is_pruned_from_active_set() {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let mut ctx = ExecutionContext::create("wf", "default", vec![], vec![] as Vec<Edge>, |_| NodeTypeClass::Executable);
        ctx.set_status(WorkflowStatus::Running);
        cache.save_execution_state(&ctx).await;
        ctx.set_status(WorkflowStatus::Completed);
        cache.save_execution_state(&ctx).await;

        let sweeper = RecoverySweeper::new(Arc::clone(&cache));
        sweeper.sweep_once().await;
        assert!(cache.active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn scan_on_startup_finds_stale_running_execution() {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let mut ctx = ExecutionContext::create("wf", "default", vec![], vec![] as Vec<Edge>, |_| NodeTypeClass::Executable);
        ctx.set_status(WorkflowStatus::Running);
        ctx.updated_at = Utc::now() - chrono::Duration::seconds(600);
        cache.save_execution_state(&ctx).await;

        let sweeper = RecoverySweeper::with_config(Arc::clone(&cache), Duration::from_secs(300), Duration::from_secs(60));
        let interrupted = sweeper.scan_on_startup().await;
        assert_eq!(interrupted, vec![ctx.execution_id.clone()]);
    }
}
