use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::instrument;
use uuid::Uuid;

use crate::waiter::EventWaiter;

const OBSERVER_CHANNEL_CAPACITY: usize = 256;

/// Message shapes broadcast by `StatusBroadcaster` (§6 "Status message
/// shapes").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    InitialStatus {
        data: Value,
    },
    NodeStatus {
        node_id: String,
        workflow_id: Option<String>,
        data: Value,
    },
    NodeOutput {
        node_id: String,
        workflow_id: Option<String>,
        output: Value,
    },
    WorkflowStatus {
        workflow_id: String,
        data: Value,
    },
    DeploymentStatus {
        workflow_id: String,
        status: String,
        data: Value,
        error: Option<String>,
    },
    WorkflowLock {
        workflow_id: String,
        data: Value,
    },
    VariableUpdate {
        name: String,
        value: Value,
    },
    ApiKeyStatus {
        provider: String,
        data: Value,
    },
    /// Domain-specific events (messaging adapter, relay, custom) and the
    /// bridge into `EventWaiter` (§4.2 `send_custom_event`).
    Custom {
        event_type: String,
        data: Value,
    },
}

#[derive(Debug, Clone)]
struct WorkflowLockState {
    locked: bool,
    locked_at: Option<DateTime<Utc>>,
    reason: Option<String>,
}

/// Process-wide pub/sub of node/deployment/workflow lifecycle events
/// (§4.2). Also the bridge by which an external custom event unblocks a
/// waiting trigger node, via `send_custom_event` forwarding into
/// `EventWaiter::dispatch_async`.
pub struct StatusBroadcaster {
    observers: DashMap<Uuid, mpsc::Sender<StatusMessage>>,
    node_status: DashMap<String, Value>,
    workflow_status: DashMap<String, Value>,
    deployment_status: DashMap<String, Value>,
    locks: DashMap<String, WorkflowLockState>,
    variables: DashMap<String, Value>,
    adapter_status: DashMap<String, Value>,
    event_waiter: Option<Arc<EventWaiter>>,
}

impl StatusBroadcaster {
    pub fn new(event_waiter: Option<Arc<EventWaiter>>) -> Self {
        Self {
            observers: DashMap::new(),
            node_status: DashMap::new(),
            workflow_status: DashMap::new(),
            deployment_status: DashMap::new(),
            locks: DashMap::new(),
            variables: DashMap::new(),
            adapter_status: DashMap::new(),
            event_waiter,
        }
    }

    fn snapshot(&self) -> Value {
        serde_json::json!({
            "nodes": self.node_status.iter().map(|e| (e.key().clone(), e.value().clone())).collect::<std::collections::HashMap<_, _>>(),
            "workflows": self.workflow_status.iter().map(|e| (e.key().clone(), e.value().clone())).collect::<std::collections::HashMap<_, _>>(),
            "deployments": self.deployment_status.iter().map(|e| (e.key().clone(), e.value().clone())).collect::<std::collections::HashMap<_, _>>(),
            "locks": self.locks.iter().map(|e| (e.key().clone(), serde_json::json!({
                "locked": e.value().locked,
                "locked_at": e.value().locked_at,
                "reason": e.value().reason,
            }))).collect::<std::collections::HashMap<_, _>>(),
            "variables": self.variables.iter().map(|e| (e.key().clone(), e.value().clone())).collect::<std::collections::HashMap<_, _>>(),
            "adapters": self.adapter_status.iter().map(|e| (e.key().clone(), e.value().clone())).collect::<std::collections::HashMap<_, _>>(),
        })
    }

    /// Registers an observer and immediately pushes the current snapshot.
    /// Returns a handle the caller uses to disconnect, plus the receiver
    /// end it should stream from.
    pub fn connect(&self) -> (Uuid, mpsc::Receiver<StatusMessage>) {
        let id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        let _ = tx.try_send(StatusMessage::InitialStatus { data: self.snapshot() });
        self.observers.insert(id, tx);
        (id, rx)
    }

    pub fn disconnect(&self, observer_id: Uuid) {
        self.observers.remove(&observer_id);
    }

    /// Best-effort concurrent fan-out; a full or closed channel drops that
    /// observer rather than blocking the rest (§4.2 "Delivery semantics").
    fn broadcast(&self, message: StatusMessage) {
        let dead: Vec<Uuid> = self
            .observers
            .iter()
            .filter_map(|e| match e.value().try_send(message.clone()) {
                Ok(()) => None,
                Err(_) => Some(*e.key()),
            })
            .collect();
        for id in dead {
            self.observers.remove(&id);
        }
    }

    #[instrument(skip(self, data))]
    pub fn update_node_status(
        &self,
        node_id: &str,
        data: Value,
        workflow_id: Option<String>,
    ) {
        self.node_status.insert(node_id.to_string(), data.clone());
        self.broadcast(StatusMessage::NodeStatus {
            node_id: node_id.to_string(),
            workflow_id,
            data,
        });
    }

    pub fn update_node_output(&self, node_id: &str, output: Value, workflow_id: Option<String>) {
        self.broadcast(StatusMessage::NodeOutput {
            node_id: node_id.to_string(),
            workflow_id,
            output,
        });
    }

    pub fn update_workflow_status(&self, workflow_id: &str, data: Value) {
        self.workflow_status.insert(workflow_id.to_string(), data.clone());
        self.broadcast(StatusMessage::WorkflowStatus {
            workflow_id: workflow_id.to_string(),
            data,
        });
    }

    pub fn update_deployment_status(
        &self,
        workflow_id: &str,
        status: &str,
        data: Value,
        error: Option<String>,
    ) {
        self.deployment_status
            .insert(workflow_id.to_string(), data.clone());
        self.broadcast(StatusMessage::DeploymentStatus {
            workflow_id: workflow_id.to_string(),
            status: status.to_string(),
            data,
            error,
        });
    }

    /// Acquires the advisory per-workflow lock. Fails if already held for
    /// that workflow; never blocks other workflows (§4.2, Property P7).
    pub fn lock_workflow(&self, workflow_id: &str, reason: Option<String>) -> bool {
        let mut acquired = false;
        self.locks
            .entry(workflow_id.to_string())
            .and_modify(|l| {
                if !l.locked {
                    l.locked = true;
                    l.locked_at = Some(Utc::now());
                    l.reason = reason.clone();
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                WorkflowLockState {
                    locked: true,
                    locked_at: Some(Utc::now()),
                    reason: reason.clone(),
                }
            });

        if acquired {
            let state = self.locks.get(workflow_id).unwrap();
            self.broadcast(StatusMessage::WorkflowLock {
                workflow_id: workflow_id.to_string(),
                data: serde_json::json!({
                    "locked": state.locked,
                    "reason": state.reason,
                    "locked_at": state.locked_at,
                }),
            });
        }
        acquired
    }

    pub fn unlock_workflow(&self, workflow_id: &str) {
        if let Some(mut state) = self.locks.get_mut(workflow_id) {
            state.locked = false;
            state.locked_at = None;
            state.reason = None;
        }
        self.broadcast(StatusMessage::WorkflowLock {
            workflow_id: workflow_id.to_string(),
            data: serde_json::json!({"locked": false, "reason": Value::Null, "locked_at": Value::Null}),
        });
    }

    pub fn update_variable(&self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value.clone());
        self.broadcast(StatusMessage::VariableUpdate {
            name: name.to_string(),
            value,
        });
    }

    pub fn update_variables(&self, variables: impl IntoIterator<Item = (String, Value)>) {
        for (name, value) in variables {
            self.update_variable(&name, value);
        }
    }

    pub fn update_adapter_status(&self, provider: &str, data: Value) {
        self.adapter_status.insert(provider.to_string(), data.clone());
        self.broadcast(StatusMessage::ApiKeyStatus {
            provider: provider.to_string(),
            data,
        });
    }

    /// Broadcasts a custom event AND forwards it into
    /// `EventWaiter::dispatch_async` — the bridge that unblocks waiting
    /// trigger nodes (§4.2).
    pub async fn send_custom_event(&self, event_type: &str, data: Value) {
        self.broadcast(StatusMessage::Custom {
            event_type: event_type.to_string(),
            data: data.clone(),
        });
        if let Some(waiter) = &self.event_waiter {
            waiter.dispatch_async(event_type, data).await;
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waiter::{InMemoryWaiterBackend, TriggerConfig, TriggerRegistry};

    #[tokio::test]
    async fn connect_pushes_initial_snapshot() {
        let broadcaster = StatusBroadcaster::new(None);
        let (_, mut rx) = broadcaster.connect();
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, StatusMessage::InitialStatus { .. }));
    }

    #[tokio::test]
    async fn locking_one_workflow_does_not_block_another() {
        let broadcaster = StatusBroadcaster::new(None);
        assert!(broadcaster.lock_workflow("wf-a", None));
        assert!(broadcaster.lock_workflow("wf-b", None));
        assert!(!broadcaster.lock_workflow("wf-a", None));

        broadcaster.unlock_workflow("wf-a");
        assert!(broadcaster.lock_workflow("wf-a", None));
    }

    #[tokio::test]
    async fn custom_event_forwards_into_event_waiter() {
        let registry = Arc::new(TriggerRegistry::new());
        registry.register("messagingReceive", TriggerConfig::unfiltered("message", "Message"));
        let waiter = Arc::new(EventWaiter::new(registry, Arc::new(InMemoryWaiterBackend::new())));
        let broadcaster = StatusBroadcaster::new(Some(Arc::clone(&waiter)));

        let pending = waiter
            .register("messagingReceive", "n1", serde_json::json!({}))
            .await;

        broadcaster
            .send_custom_event("message", serde_json::json!({"text": "hi"}))
            .await;

        let result = waiter.wait(pending).await.unwrap();
        assert_eq!(result["text"], "hi");
    }

    #[tokio::test]
    async fn node_status_updates_snapshot_and_broadcasts() {
        let broadcaster = StatusBroadcaster::new(None);
        let (_, mut rx) = broadcaster.connect();
        let _ = rx.recv().await; // initial snapshot

        broadcaster.update_node_status("n1", serde_json::json!({"status": "running"}), None);
        let msg = rx.recv().await.unwrap();
        match msg {
            StatusMessage::NodeStatus { node_id, .. } => assert_eq!(node_id, "n1"),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
