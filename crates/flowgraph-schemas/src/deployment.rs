use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{Edge, Node};

/// How a deployment's runs are executed — a settings knob threaded through
/// to `WorkflowExecutor`, not a different code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    ContinuousScheduling,
}

impl Default for ExecutorMode {
    fn default() -> Self {
        ExecutorMode::ContinuousScheduling
    }
}

/// Per-deployment tunables (§3 "Deployment state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    #[serde(default)]
    pub stop_on_error: bool,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default)]
    pub executor_mode: ExecutorMode,
}

fn default_max_concurrent_runs() -> usize {
    10
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            max_concurrent_runs: default_max_concurrent_runs(),
            executor_mode: ExecutorMode::default(),
        }
    }
}

/// Immutable snapshot of a deployment's live state (§3 "Deployment state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    pub deployment_id: String,
    pub workflow_id: String,
    pub is_running: bool,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub session_id: String,
    #[serde(default)]
    pub settings: DeploymentSettings,
    pub deployed_at: DateTime<Utc>,
}

impl DeploymentState {
    /// The wire-facing summary (structural nodes/edges are large and
    /// reproducible from the host, so they're omitted — mirrors the
    /// `ExecutionContext::to_dict` "don't store full nodes/edges" pattern).
    pub fn to_summary(&self) -> Value {
        serde_json::json!({
            "deployment_id": self.deployment_id,
            "workflow_id": self.workflow_id,
            "is_running": self.is_running,
            "session_id": self.session_id,
            "settings": self.settings,
            "deployed_at": self.deployed_at,
            "node_count": self.nodes.len(),
            "edge_count": self.edges.len(),
        })
    }
}

/// Info about one registered trigger within a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub node_id: String,
    pub node_type: String,
    /// Set for cron triggers.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Set once a `start` trigger has fired.
    #[serde(default)]
    pub fired: bool,
}

impl TriggerInfo {
    pub fn to_summary(&self) -> Value {
        let mut v = serde_json::json!({
            "type": self.node_type,
            "node_id": self.node_id,
        });
        if let Some(job_id) = &self.job_id {
            v["job_id"] = Value::String(job_id.clone());
        }
        if self.fired {
            v["fired"] = Value::Bool(true);
        }
        v
    }
}
