use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};

/// Outcome of a single handler invocation (§6 "Node handler contract").
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl HandlerOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Everything a handler needs beyond its own parameters: identity, the
/// upstream outputs reachable from it (keyed by source node type, per §4.4
/// step 5), and the descriptors of those source nodes.
#[derive(Debug, Clone)]
pub struct NodeExecContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub session_id: String,
    pub node_id: String,
    pub upstream_outputs: HashMap<String, Value>,
}

/// A single node type's executor. Implementations own their own service
/// dependencies (bound at registration time, §4.4 "Handler registry").
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(
        &self,
        node_type: &str,
        parameters: &HashMap<String, Value>,
        ctx: &NodeExecContext,
    ) -> HandlerOutcome;
}

/// O(1) node-type -> handler dispatch table.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn NodeHandler>>,
    strict_unknown_types: bool,
}

impl HandlerRegistry {
    /// `strict_unknown_types = false` (the default, §4.4) means an
    /// unregistered node type returns a synthesized success instead of an
    /// error, to permit incremental node rollout.
    pub fn new(strict_unknown_types: bool) -> Self {
        Self {
            handlers: DashMap::new(),
            strict_unknown_types,
        }
    }

    pub fn register(&self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    pub async fn dispatch(
        &self,
        node_type: &str,
        parameters: &HashMap<String, Value>,
        ctx: &NodeExecContext,
    ) -> HandlerOutcome {
        let handler = self.handlers.get(node_type).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => handler.execute(node_type, parameters, ctx).await,
            None if self.strict_unknown_types => {
                HandlerOutcome::failure(format!("no handler registered for node type '{node_type}'"))
            }
            None => HandlerOutcome::success(json!({"message": "executed"})),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl NodeHandler for EchoHandler {
        async fn execute(
            &self,
            _node_type: &str,
            parameters: &HashMap<String, Value>,
            _ctx: &NodeExecContext,
        ) -> HandlerOutcome {
            HandlerOutcome::success(json!({"echo": parameters}))
        }
    }

    fn ctx() -> NodeExecContext {
        NodeExecContext {
            execution_id: "e".into(),
            workflow_id: "w".into(),
            session_id: "s".into(),
            node_id: "n".into(),
            upstream_outputs: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_handler() {
        let registry = HandlerRegistry::new(false);
        registry.register("echo", Arc::new(EchoHandler));
        let outcome = registry.dispatch("echo", &HashMap::new(), &ctx()).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn unregistered_type_is_forgiving_by_default() {
        let registry = HandlerRegistry::new(false);
        let outcome = registry.dispatch("nonexistent", &HashMap::new(), &ctx()).await;
        assert!(outcome.success);
        assert_eq!(outcome.result.unwrap()["message"], "executed");
    }

    #[tokio::test]
    async fn unregistered_type_fails_in_strict_mode() {
        let registry = HandlerRegistry::new(true);
        let outcome = registry.dispatch("nonexistent", &HashMap::new(), &ctx()).await;
        assert!(!outcome.success);
    }
}
