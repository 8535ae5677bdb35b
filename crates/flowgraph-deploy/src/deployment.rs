//! `DeploymentManager`: the live registry of deployed workflows, their
//! trigger wiring, and the runs spawned off of them (§4.7).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use flowgraph_cache::ExecutionCache;
use flowgraph_events::StatusBroadcaster;
use flowgraph_schemas::{
    DeploymentSettings, DeploymentState, Edge, Node, NodeTypeClass, TriggerInfo,
};

use crate::error::DeploymentError;
use crate::trigger::{build_cron_expression, find_cron_nodes, find_trigger_nodes, TriggerManager};

pub struct DeployResult {
    pub deployment_id: String,
    pub trigger_count: usize,
}

pub struct CancelResult {
    pub deployment_id: String,
}

struct Deployment {
    state: DeploymentState,
    triggers: Vec<TriggerInfo>,
    concurrency: Arc<Semaphore>,
    // `AbortHandle` rather than the owning `JoinHandle`, so `cancel()` can
    // abort a run without racing the supervisor task's own await of it.
    active_runs: Arc<DashMap<String, tokio::task::AbortHandle>>,
}

/// `on_run(workflow_id, session_id, filtered_nodes, filtered_edges)` spawns
/// the run and hands back the task handle so `cancel()` can abort it.
pub type OnRun = Arc<dyn Fn(String, String, Vec<Node>, Vec<Edge>) -> tokio::task::JoinHandle<()> + Send + Sync>;

/// Owns one `Deployment` per live workflow id and the `TriggerManager`
/// shared across all of them (cron jobs and event listeners are keyed by
/// node id, which is unique per deployment since node ids are scoped to
/// their own workflow template).
pub struct DeploymentManager {
    cache: Arc<dyn ExecutionCache>,
    broadcaster: Arc<StatusBroadcaster>,
    triggers: Arc<TriggerManager>,
    classify: Arc<dyn Fn(&str) -> NodeTypeClass + Send + Sync>,
    deployments: DashMap<String, Deployment>,
    on_run: OnRun,
}

impl DeploymentManager {
    /// `on_run(workflow_id, session_id, filtered_nodes, filtered_edges)` is
    /// the host's hook for actually executing a run (typically
    /// `WorkflowExecutor::execute_workflow` spawned onto the runtime) —
    /// this crate only decides *which* filtered graph to run, not how. It
    /// must return the spawned task's `JoinHandle` so `cancel()` can abort
    /// an in-flight run.
    pub fn new(
        cache: Arc<dyn ExecutionCache>,
        broadcaster: Arc<StatusBroadcaster>,
        triggers: Arc<TriggerManager>,
        classify: Arc<dyn Fn(&str) -> NodeTypeClass + Send + Sync>,
        on_run: OnRun,
    ) -> Self {
        Self {
            cache,
            broadcaster,
            triggers,
            classify,
            deployments: DashMap::new(),
            on_run,
        }
    }

    fn is_trigger(&self, node_type: &str) -> bool {
        (self.classify)(node_type) == NodeTypeClass::Trigger
    }

    fn is_config(&self, node_type: &str) -> bool {
        (self.classify)(node_type) == NodeTypeClass::Config
    }

    fn is_toolkit(&self, node_type: &str) -> bool {
        (self.classify)(node_type) == NodeTypeClass::Toolkit
    }

    fn is_agent(&self, node_type: &str) -> bool {
        (self.classify)(node_type) == NodeTypeClass::Agent
    }

    pub fn is_deployed(&self, workflow_id: &str) -> bool {
        self.deployments.contains_key(workflow_id)
    }

    pub fn deployed_workflows(&self) -> Vec<String> {
        self.deployments.iter().map(|e| e.key().clone()).collect()
    }

    pub fn status(&self, workflow_id: &str) -> Option<Value> {
        let deployment = self.deployments.get(workflow_id)?;
        let mut summary = deployment.state.to_summary();
        summary["triggers"] = Value::Array(deployment.triggers.iter().map(|t| t.to_summary()).collect());
        Some(summary)
    }

    /// Deploy steps (§4.7):
    /// 1. reject if already deployed
    /// 2. register a cron job for every schedule-triggered node
    /// 3. fire every `start`-like independent trigger immediately
    /// 4. register a listener for every other independent trigger node
    /// 5. record `DeploymentState`
    /// 6. broadcast `deployment_status: "deployed"`
    pub async fn deploy(
        self: &Arc<Self>,
        workflow_id: &str,
        session_id: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        settings: DeploymentSettings,
    ) -> Result<DeployResult, DeploymentError> {
        if self.is_deployed(workflow_id) {
            return Err(DeploymentError::AlreadyDeployed(workflow_id.to_string()));
        }

        let cron_nodes = find_cron_nodes(&nodes, |t| self.is_trigger(t));
        let mut trigger_infos = Vec::new();
        let mut once_fires: Vec<(String, Value)> = Vec::new();

        for node in &cron_nodes {
            let frequency = node
                .data
                .extra
                .get("frequency")
                .and_then(|v| v.as_str())
                .unwrap_or("minutes")
                .to_string();

            match build_cron_expression(&frequency, &node.data.parameters) {
                Some(cron_expr) => {
                    let node_id = node.id.clone();
                    let timezone = node
                        .data
                        .parameters
                        .get("timezone")
                        .and_then(|v| v.as_str())
                        .unwrap_or("UTC")
                        .to_string();

                    // Each tick materializes a `trigger_data` record (§4.7
                    // item 3) and hands it to `spawn_run`; the scheduler
                    // thread hops onto the owning runtime first since it
                    // doesn't guarantee one is already current (§5
                    // cross-runtime dispatch).
                    let manager = Arc::clone(self);
                    let workflow_id_owned = workflow_id.to_string();
                    let frequency_owned = frequency.clone();
                    let cron_expr_owned = cron_expr.clone();
                    let iteration = Arc::new(AtomicU64::new(0));
                    let on_tick: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |node_id: String| {
                        let handle = tokio::runtime::Handle::current();
                        let manager = Arc::clone(&manager);
                        let workflow_id = workflow_id_owned.clone();
                        let frequency = frequency_owned.clone();
                        let timezone = timezone.clone();
                        let cron_expr = cron_expr_owned.clone();
                        let iteration = Arc::clone(&iteration);
                        handle.spawn(async move {
                            let seq = iteration.fetch_add(1, Ordering::SeqCst);
                            info!(node_id, seq, "cron tick fired");
                            let trigger_data = serde_json::json!({
                                "node_id": node_id,
                                "timestamp": Utc::now().to_rfc3339(),
                                "trigger_type": "cron",
                                "event_data": {
                                    "iteration": seq,
                                    "frequency": frequency,
                                    "timezone": timezone,
                                    "schedule": frequency,
                                    "cron_expression": cron_expr,
                                },
                            });
                            manager.spawn_run(&workflow_id, &node_id, trigger_data);
                        });
                    });
                    self.triggers.setup_cron(&node_id, &cron_expr, on_tick).await?;
                    trigger_infos.push(TriggerInfo {
                        node_id: node_id.clone(),
                        node_type: node.node_type.clone(),
                        job_id: self.triggers.cron_job_id(&node_id),
                        fired: false,
                    });
                }
                None => {
                    // "once": fires immediately and is never registered
                    // with the cron collaborator.
                    trigger_infos.push(TriggerInfo {
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                        job_id: None,
                        fired: true,
                    });
                    once_fires.push((node.id.clone(), node.data.initial_data.clone().unwrap_or(Value::Null)));
                }
            }
        }

        // Independent triggers (no inbound edges) that aren't cron-driven:
        // `start`-like nodes fire immediately, event triggers (webhook,
        // messaging, ...) get a collector/processor listener pair (§4.7
        // items 4-5).
        let cron_ids: HashSet<&str> = cron_nodes.iter().map(|n| n.id.as_str()).collect();
        let has_inbound: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
        let trigger_nodes = find_trigger_nodes(&nodes, |t| self.is_trigger(t));

        for node in trigger_nodes {
            if cron_ids.contains(node.id.as_str()) || has_inbound.contains(node.id.as_str()) {
                continue;
            }

            if self.triggers.is_event_trigger(&node.node_type) {
                let node_id = node.id.clone();
                let workflow_id_owned = workflow_id.to_string();
                let manager = Arc::clone(self);
                let on_fire: Arc<dyn Fn(String, Value) + Send + Sync> =
                    Arc::new(move |_node_id, payload| {
                        manager.spawn_run(&workflow_id_owned, &node_id, payload);
                    });
                let parameters = Value::Object(node.data.parameters.clone().into_iter().collect());
                self.triggers
                    .setup_event_trigger(&node.id, &node.node_type, parameters, on_fire)
                    .await;
                trigger_infos.push(TriggerInfo {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    job_id: None,
                    fired: false,
                });
            } else {
                trigger_infos.push(TriggerInfo {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    job_id: None,
                    fired: true,
                });
                once_fires.push((node.id.clone(), node.data.initial_data.clone().unwrap_or(Value::Null)));
            }
        }

        let state = DeploymentState {
            deployment_id: Uuid::now_v7().to_string(),
            workflow_id: workflow_id.to_string(),
            is_running: true,
            nodes,
            edges,
            session_id: session_id.to_string(),
            settings: settings.clone(),
            deployed_at: Utc::now(),
        };

        let deployment_id = state.deployment_id.clone();
        self.deployments.insert(
            workflow_id.to_string(),
            Deployment {
                state,
                triggers: trigger_infos.clone(),
                concurrency: Arc::new(Semaphore::new(settings.max_concurrent_runs)),
                active_runs: Arc::new(DashMap::new()),
            },
        );

        self.broadcaster.update_deployment_status(
            workflow_id,
            "deployed",
            serde_json::json!({"deployment_id": deployment_id, "trigger_count": trigger_infos.len()}),
            None,
        );

        for (node_id, seed) in once_fires {
            self.spawn_run(workflow_id, &node_id, seed);
        }

        Ok(DeployResult {
            deployment_id,
            trigger_count: trigger_infos.len(),
        })
    }

    /// Tears down every cron job and listener scoped to this workflow's
    /// trigger nodes, resets those nodes' status to idle, aborts every
    /// in-flight run, then removes the deployment record (§4.7 "Cancel
    /// deployment", P6).
    pub async fn cancel(&self, workflow_id: &str) -> Result<CancelResult, DeploymentError> {
        let Some((_, deployment)) = self.deployments.remove(workflow_id) else {
            return Err(DeploymentError::NotDeployed(workflow_id.to_string()));
        };

        let trigger_node_ids: Vec<String> = deployment.triggers.iter().map(|t| t.node_id.clone()).collect();

        for trigger in &deployment.triggers {
            if trigger.job_id.is_some() {
                let _ = self.triggers.teardown_cron(&trigger.node_id).await;
            }
        }
        // Scoped to this workflow's own trigger nodes: `TriggerManager` is
        // shared across every deployed workflow, so tearing down by node id
        // here (rather than globally) leaves other deployments' listeners
        // untouched.
        self.triggers.teardown_listeners_for(&trigger_node_ids).await;

        for node_id in &trigger_node_ids {
            self.broadcaster.update_node_status(
                node_id,
                serde_json::json!({"status": "idle", "data": {}, "timestamp": Utc::now()}),
                Some(workflow_id.to_string()),
            );
        }

        for run in deployment.active_runs.iter() {
            run.value().abort();
        }

        self.broadcaster.update_deployment_status(
            workflow_id,
            "cancelled",
            serde_json::json!({"deployment_id": deployment.state.deployment_id}),
            None,
        );

        Ok(CancelResult {
            deployment_id: deployment.state.deployment_id.clone(),
        })
    }

    /// A trigger fired: compute the downstream subgraph, seed the trigger
    /// node's output, and hand the filtered template to `on_run` — unless
    /// the deployment's concurrency budget is exhausted, in which case the
    /// event is dropped with a warning (§4.7, original `_spawn_run`: not a
    /// blocking acquire).
    pub fn spawn_run(&self, workflow_id: &str, trigger_node_id: &str, trigger_output: Value) {
        let Some(deployment) = self.deployments.get(workflow_id) else {
            warn!(workflow_id, "spawn_run for undeployed workflow");
            return;
        };

        let permit = match Arc::clone(&deployment.concurrency).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(workflow_id, trigger_node_id, "max_concurrent_runs exhausted, dropping trigger event");
                return;
            }
        };

        let (nodes, edges) = self.build_filtered_graph(&deployment.state, trigger_node_id, trigger_output);
        let session_id = deployment.state.session_id.clone();
        let workflow_id_owned = workflow_id.to_string();
        let run_id = Uuid::now_v7().to_string();
        let active_runs = Arc::clone(&deployment.active_runs);

        let run_handle = (self.on_run)(workflow_id_owned.clone(), session_id, nodes, edges);
        active_runs.insert(run_id.clone(), run_handle.abort_handle());

        self.broadcaster.update_deployment_status(
            workflow_id,
            "run_spawned",
            serde_json::json!({"run_id": run_id}),
            None,
        );

        // Hold the concurrency permit until the run's own task finishes
        // (or `cancel()` aborts it via the `AbortHandle` in `active_runs`),
        // then drop that entry.
        tokio::spawn(async move {
            let _permit = permit;
            let _ = run_handle.await;
            active_runs.remove(&run_id);
        });
    }

    /// Forward DFS from `trigger_node_id`, stopping expansion at
    /// independent trigger nodes (a trigger with no inbound data edges),
    /// then three fixed-point inclusion passes pulling in config-edge
    /// sources, toolkit-node-edge sources, and agent `input-tools`-edge
    /// sources (§4.7, ported from `_get_downstream_nodes`).
    fn downstream_node_ids(&self, nodes: &[Node], edges: &[Edge], trigger_node_id: &str) -> HashSet<String> {
        let node_types: HashMap<&str, &str> = nodes.iter().map(|n| (n.id.as_str(), n.node_type.as_str())).collect();
        let has_inbound: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();

        let mut included: HashSet<String> = HashSet::new();
        included.insert(trigger_node_id.to_string());

        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(trigger_node_id.to_string());

        while let Some(current) = queue.pop_front() {
            for edge in edges {
                if edge.source != current || included.contains(&edge.target) {
                    continue;
                }
                let target_type = node_types.get(edge.target.as_str()).copied().unwrap_or("unknown");
                let target_is_independent_trigger = self.is_trigger(target_type) && !has_inbound.contains(edge.target.as_str());
                included.insert(edge.target.clone());
                if !target_is_independent_trigger {
                    queue.push_back(edge.target.clone());
                }
            }
        }

        loop {
            let before = included.len();

            for edge in edges {
                if !included.contains(&edge.target) {
                    continue;
                }
                if edge.is_config_edge() {
                    included.insert(edge.source.clone());
                }

                let target_type = node_types.get(edge.target.as_str()).copied().unwrap_or("unknown");
                if self.is_toolkit(target_type) {
                    included.insert(edge.source.clone());
                }
                if self.is_agent(target_type) && edge.target_handle.as_deref() == Some("input-tools") {
                    included.insert(edge.source.clone());
                }
            }

            if included.len() == before {
                break;
            }
        }

        included
    }

    /// Builds the filtered `(nodes, edges)` template for a single run:
    /// the trigger node is marked `_pre_executed` with `_trigger_output`
    /// set, and everything outside the downstream set is dropped.
    fn build_filtered_graph(
        &self,
        state: &DeploymentState,
        trigger_node_id: &str,
        trigger_output: Value,
    ) -> (Vec<Node>, Vec<Edge>) {
        let included = self.downstream_node_ids(&state.nodes, &state.edges, trigger_node_id);

        let nodes: Vec<Node> = state
            .nodes
            .iter()
            .filter(|n| included.contains(&n.id))
            .cloned()
            .map(|mut n| {
                if n.id == trigger_node_id {
                    n.pre_executed = true;
                    n.trigger_output = Some(trigger_output.clone());
                }
                n
            })
            .collect();

        let edges: Vec<Edge> = state
            .edges
            .iter()
            .filter(|e| included.contains(&e.source) && included.contains(&e.target))
            .cloned()
            .collect();

        (nodes, edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_cache::InMemoryExecutionCache;
    use flowgraph_events::{EventWaiter, InMemoryWaiterBackend, StatusMessage, TriggerConfig, TriggerRegistry};
    use flowgraph_schemas::{Edge, EdgeData, NodeData};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn node(id: &str, node_type: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data: NodeData::default(),
            pre_executed: false,
            trigger_output: None,
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
            data: EdgeData::default(),
        }
    }

    fn classify(node_type: &str) -> NodeTypeClass {
        match node_type {
            "start" => NodeTypeClass::Trigger,
            "memory" => NodeTypeClass::Config,
            _ => NodeTypeClass::Executable,
        }
    }

    async fn manager_with(on_run: OnRun) -> Arc<DeploymentManager> {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let registry = Arc::new(TriggerRegistry::new());
        let waiter = Arc::new(EventWaiter::new(registry, Arc::new(InMemoryWaiterBackend::new())));
        let broadcaster = Arc::new(StatusBroadcaster::new(Some(Arc::clone(&waiter))));
        let triggers = Arc::new(TriggerManager::new(Arc::new(NoopCronScheduler), waiter));
        Arc::new(DeploymentManager::new(cache, broadcaster, triggers, Arc::new(classify), on_run))
    }

    async fn manager_with_webhook_trigger(
        on_run: OnRun,
    ) -> (Arc<DeploymentManager>, Arc<EventWaiter>) {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let registry = Arc::new(TriggerRegistry::new());
        registry.register("webhookTrigger", TriggerConfig::unfiltered("webhook", "Webhook"));
        let waiter = Arc::new(EventWaiter::new(registry, Arc::new(InMemoryWaiterBackend::new())));
        let broadcaster = Arc::new(StatusBroadcaster::new(Some(Arc::clone(&waiter))));
        let triggers = Arc::new(TriggerManager::new(Arc::new(NoopCronScheduler), Arc::clone(&waiter)));
        let classify_webhook = |node_type: &str| -> NodeTypeClass {
            match node_type {
                "webhookTrigger" => NodeTypeClass::Trigger,
                _ => NodeTypeClass::Executable,
            }
        };
        let manager = Arc::new(DeploymentManager::new(
            cache,
            broadcaster,
            triggers,
            Arc::new(classify_webhook),
            on_run,
        ));
        (manager, waiter)
    }

    fn cron_node(id: &str) -> Node {
        let mut n = node(id, "cronScheduler");
        n.data.extra.insert("triggerType".to_string(), serde_json::json!("schedule"));
        n
    }

    struct NoopCronScheduler;

    #[async_trait::async_trait]
    impl crate::trigger::CronScheduler for NoopCronScheduler {
        async fn register_cron_job(
            &self,
            _cron_expr: &str,
            _on_tick: crate::trigger::TickCallback,
            _node_id: String,
        ) -> Result<String, DeploymentError> {
            Ok("job-1".to_string())
        }

        async fn remove_cron_job(&self, _job_id: &str) -> Result<(), DeploymentError> {
            Ok(())
        }
    }

    /// Fires `on_tick` inline instead of waiting on a real schedule, so
    /// tests can assert on the run it spawns without driving a cron clock.
    struct FiringCronScheduler;

    #[async_trait::async_trait]
    impl crate::trigger::CronScheduler for FiringCronScheduler {
        async fn register_cron_job(
            &self,
            _cron_expr: &str,
            on_tick: crate::trigger::TickCallback,
            node_id: String,
        ) -> Result<String, DeploymentError> {
            on_tick(node_id);
            Ok("job-1".to_string())
        }

        async fn remove_cron_job(&self, _job_id: &str) -> Result<(), DeploymentError> {
            Ok(())
        }
    }

    async fn manager_with_firing_cron(
        on_run: OnRun,
    ) -> Arc<DeploymentManager> {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let registry = Arc::new(TriggerRegistry::new());
        let waiter = Arc::new(EventWaiter::new(registry, Arc::new(InMemoryWaiterBackend::new())));
        let broadcaster = Arc::new(StatusBroadcaster::new(Some(Arc::clone(&waiter))));
        let classify_cron = |node_type: &str| -> NodeTypeClass {
            match node_type {
                "cronScheduler" => NodeTypeClass::Trigger,
                _ => NodeTypeClass::Executable,
            }
        };
        let triggers = Arc::new(TriggerManager::new(Arc::new(FiringCronScheduler), waiter));
        Arc::new(DeploymentManager::new(cache, broadcaster, triggers, Arc::new(classify_cron), on_run))
    }

    #[tokio::test]
    async fn cron_tick_spawns_run_with_trigger_data() {
        let seen: Arc<parking_lot::Mutex<Option<Vec<Node>>>> = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let manager = manager_with_firing_cron(Arc::new(move |_, _, nodes, _| {
            let seen2 = Arc::clone(&seen2);
            tokio::spawn(async move {
                *seen2.lock() = Some(nodes);
            })
        }))
        .await;

        manager
            .deploy("wf1", "default", vec![cron_node("sched")], vec![], DeploymentSettings::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let nodes = seen.lock().take().expect("cron tick should have spawned a run");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "sched");
    }

    #[tokio::test]
    async fn deploy_rejects_second_deploy_of_same_workflow() {
        let manager = manager_with(Arc::new(|_, _, _, _| tokio::spawn(async {}))).await;
        manager
            .deploy("wf1", "default", vec![node("t", "start")], vec![], DeploymentSettings::default())
            .await
            .unwrap();
        let err = manager
            .deploy("wf1", "default", vec![node("t", "start")], vec![], DeploymentSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::AlreadyDeployed(_)));
    }

    #[tokio::test]
    async fn cancel_unknown_workflow_errors() {
        let manager = manager_with(Arc::new(|_, _, _, _| tokio::spawn(async {}))).await;
        assert!(matches!(manager.cancel("missing").await, Err(DeploymentError::NotDeployed(_))));
    }

    #[tokio::test]
    async fn downstream_filter_drops_unrelated_branch_and_keeps_config_source() {
        let nodes = vec![
            node("trig", "start"),
            node("a", "code"),
            node("cfg", "memory"),
            node("other_trig", "start"),
            node("unrelated", "code"),
        ];
        let mut cfg_edge = edge("cfg", "a");
        cfg_edge.target_handle = Some("input-memory".to_string());
        let edges = vec![edge("trig", "a"), cfg_edge, edge("other_trig", "unrelated")];

        let manager = manager_with(Arc::new(|_, _, _, _| tokio::spawn(async {}))).await;
        let included = manager.downstream_node_ids(&nodes, &edges, "trig");

        assert!(included.contains("trig"));
        assert!(included.contains("a"));
        assert!(included.contains("cfg"));
        assert!(!included.contains("unrelated"));
        assert!(!included.contains("other_trig"));
    }

    #[tokio::test]
    async fn spawn_run_invokes_on_run_with_filtered_graph() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let manager = manager_with(Arc::new(move |_, _, nodes, _edges| {
            let ran2 = Arc::clone(&ran2);
            tokio::spawn(async move {
                ran2.fetch_add(nodes.len(), Ordering::SeqCst);
            })
        }))
        .await;

        manager
            .deploy("wf1", "default", vec![node("trig", "start"), node("a", "code")], vec![edge("trig", "a")], DeploymentSettings::default())
            .await
            .unwrap();

        manager.spawn_run("wf1", "trig", serde_json::json!({"hello": "world"}));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn spawn_run_drops_event_when_concurrency_exhausted() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let manager = manager_with(Arc::new(move |_, _, _, _| {
            let ran2 = Arc::clone(&ran2);
            tokio::spawn(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
        }))
        .await;

        let mut settings = DeploymentSettings::default();
        settings.max_concurrent_runs = 0;
        manager
            .deploy("wf1", "default", vec![node("trig", "start")], vec![], settings)
            .await
            .unwrap();

        manager.spawn_run("wf1", "trig", serde_json::json!({}));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn event_trigger_node_spawns_run_on_dispatch() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let (manager, waiter) = manager_with_webhook_trigger(Arc::new(move |_, _, _, _| {
            let ran2 = Arc::clone(&ran2);
            tokio::spawn(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
        }))
        .await;

        manager
            .deploy(
                "wf1",
                "default",
                vec![node("hook", "webhookTrigger")],
                vec![],
                DeploymentSettings::default(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.dispatch_async("webhook", serde_json::json!({"path": "/x"})).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_resets_status_aborts_run_and_scopes_listener_teardown() {
        let cache: Arc<dyn ExecutionCache> = Arc::new(InMemoryExecutionCache::new());
        let registry = Arc::new(TriggerRegistry::new());
        registry.register("webhookTrigger", TriggerConfig::unfiltered("webhook", "Webhook"));
        let waiter = Arc::new(EventWaiter::new(registry, Arc::new(InMemoryWaiterBackend::new())));
        let broadcaster = Arc::new(StatusBroadcaster::new(Some(Arc::clone(&waiter))));
        let triggers = Arc::new(TriggerManager::new(Arc::new(NoopCronScheduler), Arc::clone(&waiter)));
        let classify_webhook = |node_type: &str| -> NodeTypeClass {
            match node_type {
                "webhookTrigger" => NodeTypeClass::Trigger,
                _ => NodeTypeClass::Executable,
            }
        };

        let run_ran = Arc::new(AtomicUsize::new(0));
        let aborted = Arc::new(AtomicUsize::new(0));
        let run_ran2 = Arc::clone(&run_ran);
        let aborted2 = Arc::clone(&aborted);
        // wf1's run sleeps long enough to still be in flight when cancelled;
        // wf2's run completes immediately so it can prove the listener
        // dispatch that spawned it still worked after wf1 was torn down.
        let on_run: OnRun = Arc::new(move |workflow_id, _, _, _| {
            let run_ran2 = Arc::clone(&run_ran2);
            let aborted2 = Arc::clone(&aborted2);
            tokio::spawn(async move {
                if workflow_id == "wf1" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    aborted2.fetch_add(1, Ordering::SeqCst);
                } else {
                    run_ran2.fetch_add(1, Ordering::SeqCst);
                }
            })
        });

        let manager = Arc::new(DeploymentManager::new(
            Arc::clone(&cache),
            Arc::clone(&broadcaster),
            Arc::clone(&triggers),
            Arc::new(classify_webhook),
            on_run,
        ));

        manager
            .deploy("wf1", "default", vec![node("hook1", "webhookTrigger")], vec![], DeploymentSettings::default())
            .await
            .unwrap();
        manager
            .deploy("wf2", "default", vec![node("hook2", "webhookTrigger")], vec![], DeploymentSettings::default())
            .await
            .unwrap();

        manager.spawn_run("wf1", "hook1", serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (_, mut rx) = broadcaster.connect();
        let _ = rx.recv().await; // initial snapshot

        manager.cancel("wf1").await.unwrap();

        let mut saw_idle = false;
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            if let StatusMessage::NodeStatus { node_id, data, .. } = msg {
                if node_id == "hook1" && data["status"] == "idle" {
                    saw_idle = true;
                    break;
                }
            }
        }
        assert!(saw_idle, "cancel should reset the trigger node's status to idle");

        // The sleeping wf1 run was aborted, not left to complete.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(aborted.load(Ordering::SeqCst), 0);

        // wf2's listener is untouched by wf1's cancel: dispatching still
        // reaches it since `TriggerManager` is shared across deployments.
        waiter.dispatch_async("webhook", serde_json::json!({"path": "/y"})).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(run_ran.load(Ordering::SeqCst), 1);
    }
}
