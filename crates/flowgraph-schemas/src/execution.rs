use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::node::{Edge, Node, NodeTypeClass};

/// Node execution lifecycle (§3 "NodeExecution").
///
/// `pending -> scheduled -> (running | cached) -> (completed | failed |
/// cancelled)`; `waiting` is used by trigger-style nodes inside a run;
/// `skipped` is terminal for disabled nodes or nodes whose incoming
/// conditional edges all evaluated false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cached,
    Cancelled,
    Waiting,
    Skipped,
}

impl TaskStatus {
    /// Statuses counted as "upstream satisfied" for ready-set computation
    /// (§4.6.2).
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cached | TaskStatus::Skipped)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Cached
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Skipped
        )
    }
}

/// Workflow run lifecycle (§3 "ExecutionContext").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// Tracks execution state for a single node within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub node_type: String,
    pub status: TaskStatus,
    pub input_hash: Option<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl NodeExecution {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: TaskStatus::Pending,
            input_hash: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }
}

/// One entry of `ExecutionContext::errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionErrorEntry {
    pub node_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retries_exhausted: bool,
}

/// Per-run state (§3 "ExecutionContext (per-run state)").
///
/// Invariants upheld by this type's methods:
/// - (I1) a node is in `node_executions` iff it is not a config node and
///   not a toolkit sub-node (enforced in `ExecutionContext::create`).
/// - (I2) `outputs[n]` exists iff `node_executions[n].status ∈ {completed,
///   cached}` (enforced in `set_node_status`).
/// - (I3) `checkpoints` is a prefix of any topological order consistent
///   with completion times (enforced by only ever appending in
///   `add_checkpoint`, called at the moment of completion).
/// - (I4) once `status` is terminal, it stays terminal (enforced in
///   `set_status`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub session_id: String,
    pub status: WorkflowStatus,

    pub node_executions: HashMap<String, NodeExecution>,
    pub outputs: HashMap<String, Value>,

    #[serde(skip)]
    pub nodes: Vec<Node>,
    #[serde(skip)]
    pub edges: Vec<Edge>,

    pub execution_order: Vec<Vec<String>>,
    pub current_layer: usize,
    pub checkpoints: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub errors: Vec<ExecutionErrorEntry>,
}

impl ExecutionContext {
    /// Build a fresh run from a workflow template.
    ///
    /// `classify` assigns each node's `NodeTypeClass`; it is supplied by
    /// the caller (the concrete catalog of node types lives outside this
    /// crate, §1). Toolkit sub-nodes (nodes whose only relevant outgoing
    /// edge targets a toolkit node, or that feed an agent's config
    /// handles) are excluded from `node_executions` per I1, mirroring the
    /// original's `_pre_executed` / subnode-exclusion logic in
    /// `ExecutionContext.create`.
    pub fn create(
        workflow_id: impl Into<String>,
        session_id: impl Into<String>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        classify: impl Fn(&str) -> NodeTypeClass,
    ) -> Self {
        let now = Utc::now();
        let workflow_id = workflow_id.into();

        let toolkit_node_ids: HashSet<&str> = nodes
            .iter()
            .filter(|n| classify(&n.node_type) == NodeTypeClass::Toolkit)
            .map(|n| n.id.as_str())
            .collect();
        let agent_node_ids: HashSet<&str> = nodes
            .iter()
            .filter(|n| classify(&n.node_type) == NodeTypeClass::Agent)
            .map(|n| n.id.as_str())
            .collect();

        let mut subnode_ids: HashSet<String> = HashSet::new();
        for edge in &edges {
            if toolkit_node_ids.contains(edge.target.as_str()) {
                subnode_ids.insert(edge.source.clone());
            }
            if agent_node_ids.contains(edge.target.as_str()) && edge.is_config_edge() {
                subnode_ids.insert(edge.source.clone());
            }
        }

        let mut ctx = Self {
            execution_id: Uuid::now_v7().to_string(),
            workflow_id,
            session_id: session_id.into(),
            status: WorkflowStatus::Pending,
            node_executions: HashMap::new(),
            outputs: HashMap::new(),
            nodes: nodes.clone(),
            edges,
            execution_order: Vec::new(),
            current_layer: 0,
            checkpoints: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            errors: Vec::new(),
        };

        for node in &nodes {
            if classify(&node.node_type) == NodeTypeClass::Config {
                continue;
            }
            if subnode_ids.contains(&node.id) {
                continue;
            }

            if node.pre_executed {
                let output = node.trigger_output.clone().unwrap_or(Value::Null);
                let mut node_exec = NodeExecution::new(node.id.clone(), node.node_type.clone());
                node_exec.status = TaskStatus::Completed;
                node_exec.output = Some(output.clone());
                node_exec.completed_at = Some(now);
                ctx.outputs.insert(node.id.clone(), output);
                ctx.checkpoints.push(node.id.clone());
                ctx.node_executions.insert(node.id.clone(), node_exec);
            } else {
                ctx.node_executions.insert(
                    node.id.clone(),
                    NodeExecution::new(node.id.clone(), node.node_type.clone()),
                );
            }
        }

        ctx
    }

    pub fn node_status(&self, node_id: &str) -> Option<TaskStatus> {
        self.node_executions.get(node_id).map(|n| n.status)
    }

    /// Update a node's execution status, maintaining I2 (outputs exist iff
    /// completed/cached) and the error log.
    pub fn set_node_status(
        &mut self,
        node_id: &str,
        status: TaskStatus,
        output: Option<Value>,
        error: Option<String>,
    ) {
        let Some(node_exec) = self.node_executions.get_mut(node_id) else {
            return;
        };
        node_exec.status = status;
        self.updated_at = Utc::now();

        match status {
            TaskStatus::Running => {
                node_exec.started_at = Some(self.updated_at);
            }
            TaskStatus::Completed | TaskStatus::Cached => {
                node_exec.completed_at = Some(self.updated_at);
                if let Some(output) = output {
                    node_exec.output = Some(output.clone());
                    self.outputs.insert(node_id.to_string(), output);
                }
            }
            TaskStatus::Skipped => {
                node_exec.completed_at = Some(self.updated_at);
            }
            TaskStatus::Failed => {
                node_exec.completed_at = Some(self.updated_at);
                if let Some(error) = error {
                    node_exec.error = Some(error.clone());
                    self.errors.push(ExecutionErrorEntry {
                        node_id: node_id.to_string(),
                        error,
                        timestamp: self.updated_at,
                        retries_exhausted: false,
                    });
                }
            }
            _ => {}
        }
    }

    /// Maintains I4: ignores attempts to leave a terminal status.
    pub fn set_status(&mut self, status: WorkflowStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.updated_at = Utc::now();
        if status == WorkflowStatus::Running && self.started_at.is_none() {
            self.started_at = Some(self.updated_at);
        }
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn add_checkpoint(&mut self, node_id: impl Into<String>) {
        self.checkpoints.push(node_id.into());
        self.updated_at = Utc::now();
    }

    pub fn completed_nodes(&self) -> Vec<String> {
        self.node_executions
            .iter()
            .filter(|(_, e)| e.status.satisfies_dependency())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn pending_nodes(&self) -> Vec<String> {
        self.node_executions
            .iter()
            .filter(|(_, e)| e.status == TaskStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn all_nodes_complete(&self) -> bool {
        self.node_executions.values().all(|e| {
            matches!(
                e.status,
                TaskStatus::Completed
                    | TaskStatus::Cached
                    | TaskStatus::Skipped
                    | TaskStatus::Cancelled
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeData;

    fn node(id: &str, node_type: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data: NodeData::default(),
            pre_executed: false,
            trigger_output: None,
        }
    }

    #[test]
    fn config_nodes_are_excluded_from_node_executions() {
        let nodes = vec![node("a", "start"), node("cfg", "memory")];
        let ctx = ExecutionContext::create("wf", "default", nodes, vec![], |t| {
            if t == "memory" {
                NodeTypeClass::Config
            } else if t == "start" {
                NodeTypeClass::Trigger
            } else {
                NodeTypeClass::Executable
            }
        });
        assert!(ctx.node_executions.contains_key("a"));
        assert!(!ctx.node_executions.contains_key("cfg"));
    }

    #[test]
    fn pre_executed_trigger_seeds_outputs_and_checkpoint() {
        let mut trigger = node("t", "start");
        trigger.pre_executed = true;
        trigger.trigger_output = Some(serde_json::json!({"hello": "world"}));

        let ctx = ExecutionContext::create("wf", "default", vec![trigger], vec![], |_| {
            NodeTypeClass::Trigger
        });

        assert_eq!(ctx.node_status("t"), Some(TaskStatus::Completed));
        assert_eq!(ctx.outputs.get("t").unwrap()["hello"], "world");
        assert_eq!(ctx.checkpoints, vec!["t".to_string()]);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut ctx = ExecutionContext::create("wf", "default", vec![], vec![], |_| {
            NodeTypeClass::Executable
        });
        ctx.set_status(WorkflowStatus::Failed);
        ctx.set_status(WorkflowStatus::Running);
        assert_eq!(ctx.status, WorkflowStatus::Failed);
    }

    #[test]
    fn completing_a_node_records_output_and_clears_on_failure() {
        let nodes = vec![node("a", "httpRequest")];
        let mut ctx =
            ExecutionContext::create("wf", "default", nodes, vec![], |_| NodeTypeClass::Executable);

        ctx.set_node_status(
            "a",
            TaskStatus::Completed,
            Some(serde_json::json!({"ok": true})),
            None,
        );
        assert_eq!(ctx.outputs.get("a").unwrap()["ok"], true);
        assert!(ctx.node_executions["a"].completed_at.is_some());
    }
}
