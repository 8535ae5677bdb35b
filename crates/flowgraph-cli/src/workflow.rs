//! Loading a workflow template from a YAML file on disk (a stand-in for
//! the out-of-scope workflow storage layer, §1).

use std::path::Path;

use flowgraph_schemas::{Edge, Node};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

pub fn load(path: impl AsRef<Path>) -> anyhow::Result<WorkflowDefinition> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading workflow file {}: {e}", path.display()))?;
    let definition: WorkflowDefinition = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("parsing workflow file {}: {e}", path.display()))?;
    Ok(definition)
}
