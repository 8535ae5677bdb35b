use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Target handles that express configuration composition rather than an
/// execution dependency. Edges landing on one of these must be excluded
/// when computing layers and ready sets.
pub const CONFIG_TARGET_HANDLES: &[&str] = &[
    "input-memory",
    "input-skill",
    "input-tools",
    "input-teammates",
    "input-task",
];

/// The closed classification of a node's `type` tag.
///
/// Classification itself is driven by caller-supplied sets (trigger types,
/// config types, toolkit types, agent types) since the concrete catalog of
/// node types is an external collaborator (§1, "concrete node
/// implementations... out of scope"); this type only names the classes the
/// DAG engine must tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTypeClass {
    /// Produces outputs from an external event; never has inbound data
    /// edges in the initial layer.
    Trigger,
    /// Never executed; supplies data to the node it's wired into.
    Config,
    /// Aggregates connected sub-nodes as callable tools.
    Toolkit,
    /// Consumes memory/skill/tools/teammates composition.
    Agent,
    /// Everything else — the default class for unrecognized types.
    Executable,
}

impl Default for NodeTypeClass {
    fn default() -> Self {
        NodeTypeClass::Executable
    }
}

/// A node in the workflow template graph.
///
/// Nodes are immutable within a run: the same `Node` value is shared by
/// every `ExecutionContext` that executes this workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: NodeData,
    /// Set when this run was seeded from a fired trigger: the node is
    /// treated as already completed with `trigger_output` as its output.
    #[serde(default, rename = "_pre_executed", skip_serializing_if = "is_false")]
    pub pre_executed: bool,
    #[serde(
        default,
        rename = "_trigger_output",
        skip_serializing_if = "Option::is_none"
    )]
    pub trigger_output: Option<Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// JSON string parsed as the `start` node's seed payload; kept as a raw
    /// value here, parsed by `DeploymentManager` on fire.
    #[serde(default)]
    pub initial_data: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Node {
    pub fn is_disabled(&self) -> bool {
        self.data.disabled
    }
}

/// An edge in the workflow template graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, rename = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(default, rename = "targetHandle")]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub data: EdgeData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeData {
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl Edge {
    /// True when this edge expresses configuration composition, not an
    /// execution dependency (§3 "Edge").
    pub fn is_config_edge(&self) -> bool {
        self.target_handle
            .as_deref()
            .map(|h| CONFIG_TARGET_HANDLES.contains(&h))
            .unwrap_or(false)
    }

    pub fn is_conditional(&self) -> bool {
        self.data.condition.is_some()
    }
}

/// A single edge condition: `{field, operator, value}` (§4.6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<Value>,
}

/// The fixed operator set of §4.6.3, Table in §4.6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    NotContains,
    In,
    NotIn,
    Exists,
    NotExists,
    IsEmpty,
    IsNotEmpty,
    StartsWith,
    EndsWith,
    Matches,
    IsTrue,
    IsFalse,
    IsString,
    IsNumber,
    IsBoolean,
    IsArray,
    IsObject,
    /// Any operator string outside the fixed set. §4.6.3: "unknown operator
    /// yields false" rather than a deserialization error, so unrecognized
    /// workflow data degrades gracefully instead of failing deploy.
    #[serde(other)]
    Unknown,
}
