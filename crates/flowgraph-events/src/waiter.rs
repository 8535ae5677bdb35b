use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::instrument;
use uuid::Uuid;

/// An error surfaced to a caller blocked on `EventWaiter::wait`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WaitError {
    #[error("waiter cancelled")]
    Cancelled,
}

/// `node_type -> {event_type, display_name, filter}` (§4.1).
pub struct TriggerConfig {
    pub event_type: String,
    pub display_name: String,
    /// `(parameters, event_payload) -> bool`.
    pub filter: Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>,
}

impl TriggerConfig {
    pub fn new(
        event_type: impl Into<String>,
        display_name: impl Into<String>,
        filter: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            display_name: display_name.into(),
            filter: Arc::new(filter),
        }
    }

    /// A trigger config with no filtering beyond the event type matching.
    pub fn unfiltered(event_type: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(event_type, display_name, |_, _| true)
    }
}

#[derive(Default)]
pub struct TriggerRegistry {
    configs: DashMap<String, TriggerConfig>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_type: impl Into<String>, config: TriggerConfig) {
        self.configs.insert(node_type.into(), config);
    }

    pub fn event_type_for(&self, node_type: &str) -> Option<String> {
        self.configs.get(node_type).map(|c| c.event_type.clone())
    }

    pub fn display_name_for(&self, node_type: &str) -> Option<String> {
        self.configs.get(node_type).map(|c| c.display_name.clone())
    }

    fn node_types_for_event(&self, event_type: &str) -> HashSet<String> {
        self.configs
            .iter()
            .filter(|e| e.value().event_type == event_type)
            .map(|e| e.key().clone())
            .collect()
    }

    fn matches(&self, node_type: &str, parameters: &Value, payload: &Value) -> bool {
        self.configs
            .get(node_type)
            .map(|c| (c.filter)(parameters, payload))
            .unwrap_or(false)
    }
}

/// A registered wait for an external event, returned by `EventWaiter::register`.
pub struct Waiter {
    pub id: Uuid,
    pub node_type: String,
    pub node_id: String,
    pub parameters: Value,
    receiver: oneshot::Receiver<Result<Value, WaitError>>,
}

pub(crate) struct PendingEntry {
    pub node_type: String,
    pub node_id: String,
    pub parameters: Value,
    pub tx: oneshot::Sender<Result<Value, WaitError>>,
}

/// Storage backend for pending waiters. The in-memory implementation below
/// is the only one shipped; a durable/stream-backed implementation
/// (consumer group per waiter, §4.1 "Backends") is this trait's extension
/// point and is an external collaborator for this crate.
#[async_trait]
pub trait WaiterBackend: Send + Sync {
    fn mode(&self) -> &'static str;
    fn insert(&self, id: Uuid, entry: PendingEntry);
    /// Resolve every pending waiter whose `node_type` is in `node_types`
    /// and whose `filter` accepts `payload`; returns the count resolved.
    fn resolve_matching(
        &self,
        node_types: &HashSet<String>,
        payload: &Value,
        filter: &dyn Fn(&str, &Value, &Value) -> bool,
    ) -> usize;
    fn cancel_for_node(&self, node_id: &str) -> usize;
    fn pending_count(&self) -> usize;
}

/// Single-shot in-memory waiter storage (§4.1 "an in-memory implementation
/// using single-shot promises").
#[derive(Default)]
pub struct InMemoryWaiterBackend {
    pending: DashMap<Uuid, PendingEntry>,
}

impl InMemoryWaiterBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaiterBackend for InMemoryWaiterBackend {
    fn mode(&self) -> &'static str {
        "in_memory"
    }

    fn insert(&self, id: Uuid, entry: PendingEntry) {
        self.pending.insert(id, entry);
    }

    fn resolve_matching(
        &self,
        node_types: &HashSet<String>,
        payload: &Value,
        filter: &dyn Fn(&str, &Value, &Value) -> bool,
    ) -> usize {
        let matching: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|e| {
                node_types.contains(&e.value().node_type)
                    && filter(&e.value().node_type, &e.value().parameters, payload)
            })
            .map(|e| *e.key())
            .collect();

        let mut resolved = 0;
        for id in matching {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.tx.send(Ok(payload.clone()));
                resolved += 1;
            }
        }
        resolved
    }

    fn cancel_for_node(&self, node_id: &str) -> usize {
        let matching: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|e| e.value().node_id == node_id)
            .map(|e| *e.key())
            .collect();

        let count = matching.len();
        for id in matching {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.tx.send(Err(WaitError::Cancelled));
            }
        }
        count
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Registry of pending "I am waiting for event X matching filter F"
/// requests (§4.1). Trigger adapters call `dispatch`/`dispatch_async` to
/// resolve them.
pub struct EventWaiter {
    registry: Arc<TriggerRegistry>,
    backend: Arc<dyn WaiterBackend>,
    runtime: tokio::runtime::Handle,
}

impl EventWaiter {
    /// Captures the calling thread's runtime handle so `dispatch` can hop
    /// back onto it from a thread with no runtime attached (§5
    /// "Cross-runtime dispatch").
    pub fn new(registry: Arc<TriggerRegistry>, backend: Arc<dyn WaiterBackend>) -> Self {
        Self {
            registry,
            backend,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    pub fn backend_mode(&self) -> &'static str {
        self.backend.mode()
    }

    pub fn pending_count(&self) -> usize {
        self.backend.pending_count()
    }

    #[instrument(skip(self, parameters), fields(node_type, node_id))]
    pub async fn register(&self, node_type: &str, node_id: &str, parameters: Value) -> Waiter {
        let id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        self.backend.insert(
            id,
            PendingEntry {
                node_type: node_type.to_string(),
                node_id: node_id.to_string(),
                parameters: parameters.clone(),
                tx,
            },
        );
        Waiter {
            id,
            node_type: node_type.to_string(),
            node_id: node_id.to_string(),
            parameters,
            receiver: rx,
        }
    }

    /// Blocks until `waiter` is resolved by a matching `dispatch`/
    /// `dispatch_async` call or cancelled.
    pub async fn wait(&self, waiter: Waiter) -> Result<Value, WaitError> {
        waiter.receiver.await.unwrap_or(Err(WaitError::Cancelled))
    }

    /// Async-native dispatch, safe from the owning runtime.
    #[instrument(skip(self, payload))]
    pub async fn dispatch_async(&self, event_type: &str, payload: Value) -> usize {
        let node_types = self.registry.node_types_for_event(event_type);
        if node_types.is_empty() {
            return 0;
        }
        let registry = Arc::clone(&self.registry);
        self.backend.resolve_matching(&node_types, &payload, &|node_type, parameters, payload| {
            registry.matches(node_type, parameters, payload)
        })
    }

    /// Synchronous dispatch usable from any thread (cron callbacks,
    /// native-thread inbound dispatches, §5). Internally marshals onto the
    /// owning runtime.
    pub fn dispatch(&self, event_type: &str, payload: Value) -> usize {
        self.runtime.block_on(self.dispatch_async(event_type, payload))
    }

    pub async fn cancel_for_node(&self, node_id: &str) -> usize {
        self.backend.cancel_for_node(node_id)
    }

    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter_infra() -> EventWaiter {
        let registry = Arc::new(TriggerRegistry::new());
        registry.register(
            "webhookTrigger",
            TriggerConfig::new("webhook", "Webhook", |params, payload| {
                params.get("path") == payload.get("path")
            }),
        );
        EventWaiter::new(registry, Arc::new(InMemoryWaiterBackend::new()))
    }

    #[tokio::test]
    async fn dispatch_resolves_matching_waiter() {
        let ew = waiter_infra();
        let waiter = ew
            .register("webhookTrigger", "n1", serde_json::json!({"path": "/a"}))
            .await;

        let resolved = ew
            .dispatch_async("webhook", serde_json::json!({"path": "/a", "body": "hi"}))
            .await;
        assert_eq!(resolved, 1);

        let result = ew.wait(waiter).await.unwrap();
        assert_eq!(result["body"], "hi");
    }

    #[tokio::test]
    async fn dispatch_does_not_resolve_non_matching_filter() {
        let ew = waiter_infra();
        let waiter = ew
            .register("webhookTrigger", "n1", serde_json::json!({"path": "/a"}))
            .await;

        let resolved = ew
            .dispatch_async("webhook", serde_json::json!({"path": "/b"}))
            .await;
        assert_eq!(resolved, 0);
        assert_eq!(ew.pending_count(), 1);

        ew.cancel_for_node("n1").await;
        assert!(matches!(ew.wait(waiter).await, Err(WaitError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_for_node_resolves_with_cancelled_error() {
        let ew = waiter_infra();
        let waiter = ew
            .register("webhookTrigger", "n1", serde_json::json!({}))
            .await;

        let cancelled = ew.cancel_for_node("n1").await;
        assert_eq!(cancelled, 1);
        assert!(matches!(ew.wait(waiter).await, Err(WaitError::Cancelled)));
    }

    #[tokio::test]
    async fn dispatch_is_noop_for_unregistered_event_type() {
        let ew = waiter_infra();
        let resolved = ew.dispatch_async("nonexistent", serde_json::json!({})).await;
        assert_eq!(resolved, 0);
    }
}
