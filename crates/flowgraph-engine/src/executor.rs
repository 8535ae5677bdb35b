use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use flowgraph_cache::ExecutionCache;
use flowgraph_events::StatusBroadcaster;
use flowgraph_schemas::{
    default_retry_policy, hash_inputs, DlqEntry, Edge, ExecutionContext, ExecutionErrorEntry,
    Node, NodeExecution, NodeTypeClass, RetryPolicy, TaskStatus, WorkflowStatus,
};

use crate::condition::evaluate_condition;
use crate::handler::{HandlerRegistry, NodeExecContext};
use crate::resolve::ParameterResolver;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub enable_caching: bool,
    pub dlq_enabled: bool,
    pub decide_lock_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            dlq_enabled: false,
            decide_lock_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowRunResult {
    pub success: bool,
    pub execution_id: String,
    pub status: WorkflowStatus,
    pub outputs: HashMap<String, Value>,
    pub errors: Vec<ExecutionErrorEntry>,
}

struct NodeRunOutcome {
    node_id: String,
    status: TaskStatus,
    output: Option<Value>,
    error: Option<String>,
}

/// Computes parallel execution layers via Kahn's algorithm restricted to
/// edges whose source is an executable node (§4.6.1): config nodes are
/// removed from the dependency graph entirely, since their downstreams
/// must not wait on them.
pub fn compute_execution_layers(
    nodes: &[Node],
    edges: &[Edge],
    is_trigger: impl Fn(&str) -> bool,
    is_config: impl Fn(&str) -> bool,
) -> Vec<Vec<String>> {
    let node_types: HashMap<&str, &str> =
        nodes.iter().map(|n| (n.id.as_str(), n.node_type.as_str())).collect();
    let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    let mut in_degree: HashMap<&str, usize> = node_ids.iter().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in edges {
        if !node_ids.contains(edge.source.as_str()) || !node_ids.contains(edge.target.as_str()) {
            continue;
        }
        let source_type = node_types.get(edge.source.as_str()).copied().unwrap_or("unknown");
        if is_config(source_type) {
            continue;
        }
        adjacency.entry(edge.source.as_str()).or_default().push(edge.target.as_str());
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    let mut remaining: HashSet<&str> = node_ids.clone();
    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut first_layer = true;

    while !remaining.is_empty() {
        let layer: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
            .collect();

        if layer.is_empty() {
            warn!(remaining = remaining.len(), "cycle detected in workflow graph");
            layers.push(remaining.iter().map(|s| s.to_string()).collect());
            break;
        }

        if first_layer {
            for id in &layer {
                let node_type = node_types.get(id).copied().unwrap_or("unknown");
                if !is_trigger(node_type) {
                    warn!(node_id = %id, node_type, "non-trigger node at graph entry point");
                }
            }
            first_layer = false;
        }

        layers.push(layer.iter().map(|s| s.to_string()).collect());

        for id in &layer {
            remaining.remove(id);
            if let Some(successors) = adjacency.get(id) {
                for succ in successors {
                    if let Some(d) = in_degree.get_mut(succ) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }
    }

    layers
}

/// The Conductor-decide-pattern DAG engine (§4.6): layer analysis,
/// continuous scheduling, conditional edges, per-node retry+cache, DLQ.
pub struct WorkflowExecutor {
    cache: Arc<dyn ExecutionCache>,
    handlers: Arc<HandlerRegistry>,
    broadcaster: Option<Arc<StatusBroadcaster>>,
    classify: Arc<dyn Fn(&str) -> NodeTypeClass + Send + Sync>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        cache: Arc<dyn ExecutionCache>,
        handlers: Arc<HandlerRegistry>,
        broadcaster: Option<Arc<StatusBroadcaster>>,
        classify: Arc<dyn Fn(&str) -> NodeTypeClass + Send + Sync>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            cache,
            handlers,
            broadcaster,
            classify,
            config,
        }
    }

    fn is_trigger(&self, node_type: &str) -> bool {
        (self.classify)(node_type) == NodeTypeClass::Trigger
    }

    fn is_config(&self, node_type: &str) -> bool {
        (self.classify)(node_type) == NodeTypeClass::Config
    }

    fn notify_status(&self, node_id: &str, status: &str, data: Value, workflow_id: &str) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.update_node_status(
                node_id,
                json!({"status": status, "data": data, "timestamp": Utc::now()}),
                Some(workflow_id.to_string()),
            );
        }
    }

    #[instrument(skip_all, fields(workflow_id = %workflow_id))]
    pub async fn execute_workflow(
        self: &Arc<Self>,
        workflow_id: &str,
        session_id: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> WorkflowRunResult {
        let classify = Arc::clone(&self.classify);
        let mut ctx = ExecutionContext::create(
            workflow_id,
            session_id,
            nodes.clone(),
            edges.clone(),
            |t| classify(t),
        );
        ctx.execution_order =
            compute_execution_layers(&nodes, &edges, |t| self.is_trigger(t), |t| self.is_config(t));
        ctx.set_status(WorkflowStatus::Running);
        self.cache.save_execution_state(&ctx).await;
        self.cache
            .add_event(
                &ctx.execution_id,
                "workflow_started",
                json!({"workflow_id": workflow_id, "node_count": nodes.len()}),
            )
            .await;

        self.workflow_decide(&mut ctx).await;

        if ctx.all_nodes_complete() && ctx.errors.is_empty() {
            ctx.set_status(WorkflowStatus::Completed);
        } else if !ctx.errors.is_empty() {
            ctx.set_status(WorkflowStatus::Failed);
        }
        self.cache.save_execution_state(&ctx).await;
        self.cache
            .add_event(
                &ctx.execution_id,
                "workflow_completed",
                json!({"status": format!("{:?}", ctx.status)}),
            )
            .await;

        WorkflowRunResult {
            success: ctx.status == WorkflowStatus::Completed,
            execution_id: ctx.execution_id.clone(),
            status: ctx.status,
            outputs: ctx.outputs.clone(),
            errors: ctx.errors.clone(),
        }
    }

    /// Conductor's decide pattern: a per-execution distributed lock
    /// prevents two replicas from running the decide loop for the same
    /// run concurrently (§4.6, original `_workflow_decide`).
    async fn workflow_decide(self: &Arc<Self>, ctx: &mut ExecutionContext) {
        loop {
            let lock_name = format!("execution:{}:decide", ctx.execution_id);
            match self
                .cache
                .distributed_lock(&lock_name, self.config.decide_lock_timeout)
                .await
            {
                Ok(_guard) => {
                    self.decide_iteration(ctx).await;
                    return;
                }
                Err(_) => {
                    warn!(execution_id = %ctx.execution_id, "could not acquire decide lock, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn decide_iteration(self: &Arc<Self>, ctx: &mut ExecutionContext) {
        if ctx.status == WorkflowStatus::Cancelled {
            return;
        }
        let ready = self.find_ready_nodes(ctx);
        if ready.is_empty() {
            return;
        }
        self.execute_with_continuous_scheduling(ctx, ready).await;
        self.cache.save_execution_state(ctx).await;
    }

    /// §4.6.4: a completion never waits for its layer peers — the moment a
    /// dependent becomes ready it is scheduled, via a `JoinSet` driven by
    /// first-completion order.
    async fn execute_with_continuous_scheduling(
        self: &Arc<Self>,
        ctx: &mut ExecutionContext,
        initial: Vec<String>,
    ) {
        let mut join_set: JoinSet<NodeRunOutcome> = JoinSet::new();
        for node_id in &initial {
            self.schedule_node(ctx, &mut join_set, node_id);
        }

        let mut workflow_failed = false;
        while let Some(joined) = join_set.join_next().await {
            if ctx.status == WorkflowStatus::Cancelled {
                join_set.abort_all();
                break;
            }

            let Ok(outcome) = joined else {
                continue;
            };

            match outcome.status {
                TaskStatus::Completed | TaskStatus::Cached => {
                    ctx.set_node_status(&outcome.node_id, outcome.status, outcome.output, None);
                    ctx.add_checkpoint(&outcome.node_id);
                    let newly_ready = self.find_ready_nodes(ctx);
                    for node_id in &newly_ready {
                        self.schedule_node(ctx, &mut join_set, node_id);
                    }
                }
                _ => {
                    ctx.set_node_status(&outcome.node_id, TaskStatus::Failed, None, outcome.error);
                    workflow_failed = true;
                }
            }

            self.cache.save_execution_state(ctx).await;

            if workflow_failed {
                break;
            }
        }

        if workflow_failed {
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
            ctx.set_status(WorkflowStatus::Failed);
        }
    }

    /// §4.6.2 ready-set computation.
    fn find_ready_nodes(&self, ctx: &mut ExecutionContext) -> Vec<String> {
        let completed: HashSet<String> = ctx.completed_nodes().into_iter().collect();
        let node_types: HashMap<String, String> =
            ctx.nodes.iter().map(|n| (n.id.clone(), n.node_type.clone())).collect();

        let mut dependencies: HashMap<String, HashSet<String>> = HashMap::new();
        let mut conditional_edges: HashMap<String, Vec<Edge>> = HashMap::new();

        for edge in &ctx.edges {
            let source_type = node_types.get(&edge.source).cloned().unwrap_or_default();
            if self.is_config(&source_type) {
                continue;
            }
            dependencies
                .entry(edge.target.clone())
                .or_default()
                .insert(edge.source.clone());
            if edge.is_conditional() {
                conditional_edges
                    .entry(edge.target.clone())
                    .or_default()
                    .push(edge.clone());
            }
        }

        let pending_ids: Vec<String> = ctx
            .node_executions
            .iter()
            .filter(|(_, e)| e.status == TaskStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();

        let mut ready = Vec::new();
        for node_id in pending_ids {
            let deps = dependencies.get(&node_id).cloned().unwrap_or_default();
            if !deps.is_subset(&completed) {
                continue;
            }

            let disabled = ctx
                .nodes
                .iter()
                .find(|n| n.id == node_id)
                .map(|n| n.is_disabled())
                .unwrap_or(false);
            if disabled {
                ctx.set_node_status(&node_id, TaskStatus::Skipped, None, None);
                self.notify_status(&node_id, "skipped", json!({"disabled": true}), &ctx.workflow_id);
                continue;
            }

            if let Some(edges) = conditional_edges.get(&node_id) {
                let matched = edges.iter().any(|e| {
                    let source_output = ctx.outputs.get(&e.source).cloned().unwrap_or(Value::Null);
                    e.data
                        .condition
                        .as_ref()
                        .map(|c| evaluate_condition(c, &source_output))
                        .unwrap_or(false)
                });
                if !matched {
                    ctx.set_node_status(&node_id, TaskStatus::Skipped, None, None);
                    self.notify_status(
                        &node_id,
                        "skipped",
                        json!({"reason": "conditions_not_met"}),
                        &ctx.workflow_id,
                    );
                    continue;
                }
            }

            ready.push(node_id);
        }
        ready
    }

    fn primary_upstream_output(&self, ctx: &ExecutionContext, node_id: &str) -> Option<Value> {
        ctx.edges
            .iter()
            .filter(|e| e.target == node_id && !e.is_config_edge())
            .find_map(|e| ctx.outputs.get(&e.source).cloned())
    }

    /// Outputs of non-config upstreams, keyed by source node type (§4.4
    /// step 5, original `_gather_node_inputs`).
    fn gather_node_inputs(&self, ctx: &ExecutionContext, node_id: &str) -> HashMap<String, Value> {
        let mut inputs = HashMap::new();
        for edge in &ctx.edges {
            if edge.target != node_id {
                continue;
            }
            if let Some(output) = ctx.outputs.get(&edge.source) {
                if let Some(source_node) = ctx.nodes.iter().find(|n| n.id == edge.source) {
                    inputs.insert(source_node.node_type.clone(), output.clone());
                }
            }
        }
        inputs
    }

    fn schedule_node(
        self: &Arc<Self>,
        ctx: &mut ExecutionContext,
        join_set: &mut JoinSet<NodeRunOutcome>,
        node_id: &str,
    ) {
        let Some(node) = ctx.nodes.iter().find(|n| n.id == node_id).cloned() else {
            return;
        };
        ctx.set_node_status(node_id, TaskStatus::Scheduled, None, None);
        self.notify_status(node_id, "scheduled", json!({}), &ctx.workflow_id);

        let outputs_snapshot = ctx.outputs.clone();
        let primary = self.primary_upstream_output(ctx, node_id);
        let resolver = ParameterResolver::new(&ctx.nodes, &outputs_snapshot, primary.as_ref());
        let parameters = resolver.resolve_parameters(&node.data.parameters);

        let inputs = self.gather_node_inputs(ctx, node_id);
        let retry_policy = node
            .data
            .parameters
            .get("retryPolicy")
            .and_then(|v| serde_json::from_value::<RetryPolicy>(v.clone()).ok())
            .unwrap_or_else(|| default_retry_policy(&node.node_type));

        let executor = Arc::clone(self);
        let execution_id = ctx.execution_id.clone();
        let workflow_id = ctx.workflow_id.clone();
        let session_id = ctx.session_id.clone();
        let node_id_owned = node_id.to_string();
        let node_type = node.node_type.clone();

        join_set.spawn(async move {
            executor
                .run_node(
                    execution_id,
                    workflow_id,
                    session_id,
                    node_id_owned,
                    node_type,
                    parameters,
                    inputs,
                    retry_policy,
                )
                .await
        });
    }

    /// §4.6.5: retry-and-cache routine for a single scheduled node.
    async fn run_node(
        self: Arc<Self>,
        execution_id: String,
        workflow_id: String,
        session_id: String,
        node_id: String,
        node_type: String,
        parameters: HashMap<String, Value>,
        inputs: HashMap<String, Value>,
        retry_policy: RetryPolicy,
    ) -> NodeRunOutcome {
        let inputs_value = Value::Object(inputs.clone().into_iter().collect());
        let input_hash = hash_inputs(&inputs_value);

        if self.config.enable_caching {
            if let Some(cached) = self
                .cache
                .get_cached_result(&execution_id, &node_id, &input_hash)
                .await
            {
                self.notify_status(
                    &node_id,
                    "success",
                    json!({"cached": true, "result": cached}),
                    &workflow_id,
                );
                self.cache
                    .add_event(&execution_id, "node_cached", json!({"node_id": node_id}))
                    .await;
                return NodeRunOutcome {
                    node_id,
                    status: TaskStatus::Cached,
                    output: Some(cached),
                    error: None,
                };
            }
        }

        let mut last_error: Option<String> = None;

        for attempt in 0..retry_policy.max_attempts {
            self.cache.update_heartbeat(&execution_id, &node_id).await;
            self.notify_status(&node_id, "executing", json!({}), &workflow_id);
            self.cache
                .add_event(
                    &execution_id,
                    "node_started",
                    json!({"node_id": node_id, "node_type": node_type}),
                )
                .await;

            let handler_ctx = NodeExecContext {
                execution_id: execution_id.clone(),
                workflow_id: workflow_id.clone(),
                session_id: session_id.clone(),
                node_id: node_id.clone(),
                upstream_outputs: inputs.clone(),
            };
            let outcome = self.handlers.dispatch(&node_type, &parameters, &handler_ctx).await;

            if outcome.success {
                let result = outcome.result.unwrap_or(Value::Null);
                if self.config.enable_caching {
                    self.cache
                        .set_cached_result(&execution_id, &node_id, &input_hash, result.clone())
                        .await;
                }
                self.notify_status(&node_id, "success", result.clone(), &workflow_id);
                self.cache
                    .add_event(&execution_id, "node_completed", json!({"node_id": node_id}))
                    .await;
                return NodeRunOutcome {
                    node_id,
                    status: TaskStatus::Completed,
                    output: Some(result),
                    error: None,
                };
            }

            let error = outcome.error.unwrap_or_else(|| "Unknown error".to_string());
            last_error = Some(error.clone());

            if retry_policy.is_retryable(&error, attempt + 1) {
                let delay = retry_policy.delay_for_attempt(attempt);
                self.notify_status(
                    &node_id,
                    "retrying",
                    json!({
                        "attempt": attempt + 1,
                        "max_attempts": retry_policy.max_attempts,
                        "delay_secs": delay.as_secs_f64(),
                        "error": error,
                    }),
                    &workflow_id,
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            break;
        }

        if self.config.dlq_enabled {
            let mut node_exec = NodeExecution::new(node_id.clone(), node_type.clone());
            node_exec.error = last_error.clone();
            node_exec.retry_count = retry_policy.max_attempts;
            let entry = DlqEntry::create(&execution_id, &workflow_id, &node_exec, inputs.clone());
            self.cache.add_to_dlq(entry).await;
        }

        let error = last_error.unwrap_or_else(|| "Unknown error".to_string());
        self.notify_status(&node_id, "error", json!({"error": error}), &workflow_id);
        NodeRunOutcome {
            node_id,
            status: TaskStatus::Failed,
            output: None,
            error: Some(error),
        }
    }

    /// §4.6.6: resume an interrupted run. `running` nodes are reset to
    /// `pending`; cached outputs already persisted are honored, so
    /// completed work is not repeated.
    pub async fn recover_execution(
        self: &Arc<Self>,
        execution_id: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Option<WorkflowRunResult> {
        let mut ctx = self.cache.load_execution_state(execution_id).await?;
        ctx.nodes = nodes;
        ctx.edges = edges;

        if ctx.status != WorkflowStatus::Running {
            return Some(WorkflowRunResult {
                success: ctx.status == WorkflowStatus::Completed,
                execution_id: ctx.execution_id.clone(),
                status: ctx.status,
                outputs: ctx.outputs.clone(),
                errors: ctx.errors.clone(),
            });
        }

        for node_exec in ctx.node_executions.values_mut() {
            if node_exec.status == TaskStatus::Running {
                node_exec.status = TaskStatus::Pending;
                node_exec.started_at = None;
            }
        }

        self.workflow_decide(&mut ctx).await;

        if ctx.all_nodes_complete() && ctx.errors.is_empty() {
            ctx.set_status(WorkflowStatus::Completed);
        } else if !ctx.errors.is_empty() {
            ctx.set_status(WorkflowStatus::Failed);
        }
        self.cache.save_execution_state(&ctx).await;

        Some(WorkflowRunResult {
            success: ctx.status == WorkflowStatus::Completed,
            execution_id: ctx.execution_id.clone(),
            status: ctx.status,
            outputs: ctx.outputs.clone(),
            errors: ctx.errors.clone(),
        })
    }

    /// §4.6.7: replay a single dead-lettered node in isolation, seeding
    /// `outputs` from the entry's stored inputs.
    pub async fn replay_dlq_entry(
        self: &Arc<Self>,
        entry_id: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> WorkflowRunResult {
        let not_found = |msg: String| WorkflowRunResult {
            success: false,
            execution_id: String::new(),
            status: WorkflowStatus::Failed,
            outputs: HashMap::new(),
            errors: vec![ExecutionErrorEntry {
                node_id: String::new(),
                error: msg,
                timestamp: Utc::now(),
                retries_exhausted: false,
            }],
        };

        let Some(entry) = self.cache.get_dlq_entry(entry_id).await else {
            return not_found(format!("DLQ entry not found: {entry_id}"));
        };

        let classify = Arc::clone(&self.classify);
        let mut ctx = ExecutionContext::create(
            entry.workflow_id.clone(),
            "dlq_replay",
            nodes,
            edges,
            |t| classify(t),
        );
        ctx.outputs = entry.inputs.clone();
        ctx.set_status(WorkflowStatus::Running);

        if !ctx.node_executions.contains_key(&entry.node_id) {
            return not_found(format!("node not found in workflow: {}", entry.node_id));
        }

        let mut join_set: JoinSet<NodeRunOutcome> = JoinSet::new();
        self.schedule_node(&mut ctx, &mut join_set, &entry.node_id);
        let joined = join_set.join_next().await.and_then(Result::ok);

        match joined {
            Some(outcome) if matches!(outcome.status, TaskStatus::Completed | TaskStatus::Cached) => {
                ctx.set_node_status(&entry.node_id, outcome.status, outcome.output, None);
                self.cache.remove_from_dlq(entry_id).await;
                WorkflowRunResult {
                    success: true,
                    execution_id: ctx.execution_id.clone(),
                    status: WorkflowStatus::Completed,
                    outputs: ctx.outputs.clone(),
                    errors: vec![],
                }
            }
            Some(outcome) => {
                let mut updated = entry.clone();
                updated.touch_failure();
                updated.error = outcome.error.clone().unwrap_or_else(|| "Unknown error".to_string());
                self.cache.update_dlq_entry(updated).await;
                ctx.set_node_status(&entry.node_id, TaskStatus::Failed, None, outcome.error);
                WorkflowRunResult {
                    success: false,
                    execution_id: ctx.execution_id.clone(),
                    status: WorkflowStatus::Failed,
                    outputs: ctx.outputs.clone(),
                    errors: ctx.errors.clone(),
                }
            }
            None => not_found(format!("node task did not complete: {}", entry.node_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowgraph_cache::InMemoryExecutionCache;
    use flowgraph_schemas::{Edge as SchemaEdge, EdgeData, Node as SchemaNode, NodeData};

    use crate::handler::HandlerOutcome;

    struct EchoHandler;

    #[async_trait]
    impl crate::handler::NodeHandler for EchoHandler {
        async fn execute(
            &self,
            _node_type: &str,
            parameters: &HashMap<String, Value>,
            _ctx: &NodeExecContext,
        ) -> HandlerOutcome {
            HandlerOutcome::success(json!({"params": parameters}))
        }
    }

    struct AlwaysFailHandler;

    #[async_trait]
    impl crate::handler::NodeHandler for AlwaysFailHandler {
        async fn execute(
            &self,
            _node_type: &str,
            _parameters: &HashMap<String, Value>,
            _ctx: &NodeExecContext,
        ) -> HandlerOutcome {
            HandlerOutcome::failure("permanent failure")
        }
    }

    fn node(id: &str, node_type: &str) -> SchemaNode {
        SchemaNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data: NodeData::default(),
            pre_executed: false,
            trigger_output: None,
        }
    }

    fn edge(source: &str, target: &str) -> SchemaEdge {
        SchemaEdge {
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
            data: EdgeData::default(),
        }
    }

    fn classify(node_type: &str) -> NodeTypeClass {
        if node_type == "start" {
            NodeTypeClass::Trigger
        } else {
            NodeTypeClass::Executable
        }
    }

    fn executor(handlers: HandlerRegistry, enable_caching: bool) -> Arc<WorkflowExecutor> {
        Arc::new(WorkflowExecutor::new(
            Arc::new(InMemoryExecutionCache::new()),
            Arc::new(handlers),
            None,
            Arc::new(classify),
            ExecutorConfig {
                enable_caching,
                dlq_enabled: false,
                decide_lock_timeout: Duration::from_secs(5),
            },
        ))
    }

    #[tokio::test]
    async fn linear_workflow_completes() {
        let handlers = HandlerRegistry::new(false);
        handlers.register("start", Arc::new(EchoHandler));
        handlers.register("step", Arc::new(EchoHandler));
        let exec = executor(handlers, true);

        let nodes = vec![node("a", "start"), node("b", "step")];
        let edges = vec![edge("a", "b")];

        let result = exec.execute_workflow("wf1", "default", nodes, edges).await;
        assert!(result.success);
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert!(result.outputs.contains_key("a"));
        assert!(result.outputs.contains_key("b"));
    }

    #[tokio::test]
    async fn permanent_failure_marks_workflow_failed() {
        let handlers = HandlerRegistry::new(false);
        handlers.register("start", Arc::new(EchoHandler));
        handlers.register("step", Arc::new(AlwaysFailHandler));
        let exec = executor(handlers, true);

        let nodes = vec![node("a", "start"), node("b", "step")];
        let edges = vec![edge("a", "b")];

        let result = exec.execute_workflow("wf2", "default", nodes, edges).await;
        assert!(!result.success);
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].node_id, "b");
    }

    #[tokio::test]
    async fn disabled_node_is_skipped_and_workflow_still_completes() {
        let handlers = HandlerRegistry::new(false);
        handlers.register("start", Arc::new(EchoHandler));
        let exec = executor(handlers, true);

        let mut disabled = node("b", "step");
        disabled.data.disabled = true;

        let nodes = vec![node("a", "start"), disabled];
        let edges = vec![edge("a", "b")];

        let result = exec.execute_workflow("wf3", "default", nodes, edges).await;
        assert!(result.success);
        assert!(!result.outputs.contains_key("b"));
    }

    #[tokio::test]
    async fn conditional_edge_gates_downstream_execution() {
        let handlers = HandlerRegistry::new(false);
        handlers.register("start", Arc::new(EchoHandler));
        handlers.register("gated", Arc::new(EchoHandler));
        let exec = executor(handlers, true);

        let mut gated_edge = edge("a", "b");
        gated_edge.data.condition = Some(flowgraph_schemas::Condition {
            field: "params".to_string(),
            operator: flowgraph_schemas::ConditionOperator::Eq,
            value: Some(json!("never")),
        });

        let nodes = vec![node("a", "start"), node("b", "gated")];
        let edges = vec![gated_edge];

        let result = exec.execute_workflow("wf4", "default", nodes, edges).await;
        assert!(result.success);
        assert!(!result.outputs.contains_key("b"));
    }
}
