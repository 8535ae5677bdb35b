//! External-collaborator traits named by §6 but owned by the deploying
//! host: per-session credentials, per-node parameter overrides, and
//! cross-run output lookups. Each ships only an in-memory test double —
//! a production-backed implementation lives outside this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_api_key(&self, provider: &str, session_id: &str) -> Option<String>;
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_node_parameters(&self, node_id: &str) -> Option<HashMap<String, Value>>;
    async fn save_node_parameters(&self, node_id: &str, parameters: HashMap<String, Value>);
}

#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn get_node_output(&self, session_id: &str, node_id: &str, output_name: &str) -> Option<Value>;
    async fn save_node_output(&self, session_id: &str, node_id: &str, output_name: &str, value: Value);
}

/// A sink for deployment/run events a host wires in directly, as an
/// alternative to subscribing through `StatusBroadcaster`.
pub trait Observer: Send + Sync {
    fn on_event(&self, event_type: &str, data: Value);
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    keys: DashMap<(String, String), String>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, provider: &str, session_id: &str, key: impl Into<String>) {
        self.keys.insert((provider.to_string(), session_id.to_string()), key.into());
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_api_key(&self, provider: &str, session_id: &str) -> Option<String> {
        self.keys
            .get(&(provider.to_string(), session_id.to_string()))
            .map(|e| e.clone())
    }
}

#[derive(Default)]
pub struct InMemoryParameterStore {
    parameters: DashMap<String, HashMap<String, Value>>,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParameterStore for InMemoryParameterStore {
    async fn get_node_parameters(&self, node_id: &str) -> Option<HashMap<String, Value>> {
        self.parameters.get(node_id).map(|e| e.clone())
    }

    async fn save_node_parameters(&self, node_id: &str, parameters: HashMap<String, Value>) {
        self.parameters.insert(node_id.to_string(), parameters);
    }
}

#[derive(Default)]
pub struct InMemoryOutputStore {
    outputs: DashMap<(String, String, String), Value>,
}

impl InMemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutputStore for InMemoryOutputStore {
    async fn get_node_output(&self, session_id: &str, node_id: &str, output_name: &str) -> Option<Value> {
        self.outputs
            .get(&(session_id.to_string(), node_id.to_string(), output_name.to_string()))
            .map(|e| e.clone())
    }

    async fn save_node_output(&self, session_id: &str, node_id: &str, output_name: &str, value: Value) {
        self.outputs
            .insert((session_id.to_string(), node_id.to_string(), output_name.to_string()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn credential_store_roundtrips() {
        let store = InMemoryCredentialStore::new();
        store.set("openai", "session-1", "sk-test");
        assert_eq!(
            store.get_api_key("openai", "session-1").await,
            Some("sk-test".to_string())
        );
        assert_eq!(store.get_api_key("openai", "session-2").await, None);
    }

    #[tokio::test]
    async fn output_store_is_scoped_by_session_and_node() {
        let store = InMemoryOutputStore::new();
        store.save_node_output("s1", "n1", "result", serde_json::json!(42)).await;
        assert_eq!(store.get_node_output("s1", "n1", "result").await, Some(serde_json::json!(42)));
        assert_eq!(store.get_node_output("s2", "n1", "result").await, None);
    }
}
