use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::execution::NodeExecution;

/// A dead-letter entry for a node execution that exhausted its retry
/// budget (§3 "DLQEntry"). Indexed by workflow, by node_type, and globally
/// by `flowgraph-cache`'s key schema — this struct only carries the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    pub execution_id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub node_type: String,
    pub error: String,
    pub inputs: HashMap<String, Value>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_error_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Factory mirroring the original's `DLQEntry.create(ctx, node_exec,
    /// inputs)`.
    pub fn create(
        execution_id: &str,
        workflow_id: &str,
        node_exec: &NodeExecution,
        inputs: HashMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            execution_id: execution_id.to_string(),
            workflow_id: workflow_id.to_string(),
            node_id: node_exec.node_id.clone(),
            node_type: node_exec.node_type.clone(),
            error: node_exec
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string()),
            inputs,
            retry_count: node_exec.retry_count,
            created_at: now,
            last_error_at: now,
        }
    }

    pub fn touch_failure(&mut self) {
        self.retry_count += 1;
        self.last_error_at = Utc::now();
    }
}
