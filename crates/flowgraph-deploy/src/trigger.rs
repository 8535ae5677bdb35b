//! Cron and event-based trigger lifecycle (§4.7, §6 Table 6-A).
//!
//! `TriggerManager` owns one `CronScheduler` job per cron trigger node and
//! one listener task pair per event trigger node, keyed by node id so a
//! deployment can tear them down without touching the rest of the graph.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use flowgraph_events::EventWaiter;
use flowgraph_schemas::Node;

use crate::error::DeploymentError;

/// A tick callback invoked on the node's own schedule. Implementations hop
/// back onto the owning tokio runtime themselves (§5 "Cross-runtime
/// dispatch") since the scheduler's internal callback context does not
/// guarantee one is already current.
pub type TickCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Thin seam over `tokio_cron_scheduler::JobScheduler` so the rest of this
/// module, and its tests, don't depend on a live scheduler thread.
#[async_trait]
pub trait CronScheduler: Send + Sync {
    async fn register_cron_job(&self, cron_expr: &str, on_tick: TickCallback, node_id: String) -> Result<String, DeploymentError>;
    async fn remove_cron_job(&self, job_id: &str) -> Result<(), DeploymentError>;
}

pub struct TokioCronScheduler {
    scheduler: JobScheduler,
}

impl TokioCronScheduler {
    pub async fn new() -> Result<Self, DeploymentError> {
        let scheduler = JobScheduler::new().await.map_err(|e| DeploymentError::Cron(e.to_string()))?;
        scheduler.start().await.map_err(|e| DeploymentError::Cron(e.to_string()))?;
        Ok(Self { scheduler })
    }
}

#[async_trait]
impl CronScheduler for TokioCronScheduler {
    async fn register_cron_job(&self, cron_expr: &str, on_tick: TickCallback, node_id: String) -> Result<String, DeploymentError> {
        let job = Job::new(cron_expr, move |_uuid, _l| {
            on_tick(node_id.clone());
        })
        .map_err(|e| DeploymentError::Cron(e.to_string()))?;

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| DeploymentError::Cron(e.to_string()))?;
        Ok(job_id.to_string())
    }

    async fn remove_cron_job(&self, job_id: &str) -> Result<(), DeploymentError> {
        let uuid = job_id
            .parse()
            .map_err(|_| DeploymentError::Cron(format!("invalid job id: {job_id}")))?;
        self.scheduler
            .remove(&uuid)
            .await
            .map_err(|e| DeploymentError::Cron(e.to_string()))
    }
}

/// Per-node listener handle torn down on `teardown_all_listeners`.
struct ListenerHandle {
    collector: tokio::task::JoinHandle<()>,
    processor: tokio::task::JoinHandle<()>,
}

/// Maps user-friendly frequency parameters onto a 6-field `second minute
/// hour day month weekday` cron string (§6 Table 6-A). `once` is not
/// representable as a recurring cron expression and must be handled by the
/// caller by firing immediately and never registering a job.
pub fn build_cron_expression(frequency: &str, parameters: &HashMap<String, Value>) -> Option<String> {
    if frequency == "once" {
        return None;
    }

    let get_str = |key: &str| -> Option<String> {
        parameters.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };
    let time_parts = |time: &str| -> (String, String) {
        let mut parts = time.splitn(2, ':');
        let hour = parts.next().filter(|s| !s.is_empty()).unwrap_or("9").to_string();
        let minute = parts.next().filter(|s| !s.is_empty()).unwrap_or("0").to_string();
        (hour, minute)
    };

    let mut second = "0".to_string();
    let mut minute = "*/5".to_string();
    let mut hour = "*".to_string();
    let mut day = "*".to_string();
    let month = "*".to_string();
    let mut weekday = "*".to_string();

    match frequency {
        "seconds" => {
            let interval = get_str("interval").unwrap_or_else(|| "30".to_string());
            second = format!("*/{interval}");
            minute = "*".to_string();
        }
        "minutes" => {
            let interval = get_str("intervalMinutes").unwrap_or_else(|| "5".to_string());
            minute = if interval == "1" { "*".to_string() } else { format!("*/{interval}") };
        }
        "hours" => {
            let interval = get_str("intervalHours").unwrap_or_else(|| "1".to_string());
            minute = "0".to_string();
            hour = if interval == "1" { "*".to_string() } else { format!("*/{interval}") };
        }
        "days" => {
            let (h, m) = time_parts(&get_str("dailyTime").unwrap_or_else(|| "09:00".to_string()));
            hour = h;
            minute = m;
        }
        "weeks" => {
            let (h, m) = time_parts(&get_str("weeklyTime").unwrap_or_else(|| "09:00".to_string()));
            hour = h;
            minute = m;
            weekday = get_str("weekday").unwrap_or_else(|| "1".to_string());
        }
        "months" => {
            let (h, m) = time_parts(&get_str("monthlyTime").unwrap_or_else(|| "09:00".to_string()));
            hour = h;
            minute = m;
            day = get_str("monthDay").unwrap_or_else(|| "1".to_string());
        }
        other => {
            warn!(frequency = other, "unrecognized trigger frequency, defaulting to every 5 minutes");
        }
    }

    Some(format!("{second} {minute} {hour} {day} {month} {weekday}"))
}

/// `node.type` classes recognized as cron-driven triggers (§6 "start"
/// node family with `triggerType: schedule`).
pub fn find_cron_nodes<'a>(nodes: &'a [Node], is_trigger: impl Fn(&str) -> bool) -> Vec<&'a Node> {
    nodes
        .iter()
        .filter(|n| is_trigger(&n.node_type) && n.data.extra.get("triggerType").and_then(|v| v.as_str()) == Some("schedule"))
        .collect()
}

pub fn find_trigger_nodes<'a>(nodes: &'a [Node], is_trigger: impl Fn(&str) -> bool) -> Vec<&'a Node> {
    nodes.iter().filter(|n| is_trigger(&n.node_type)).collect()
}

pub struct TriggerManager {
    cron: Arc<dyn CronScheduler>,
    waiter: Arc<EventWaiter>,
    cron_jobs: DashMap<String, String>,
    listeners: DashMap<String, ListenerHandle>,
}

impl TriggerManager {
    pub fn new(cron: Arc<dyn CronScheduler>, waiter: Arc<EventWaiter>) -> Self {
        Self {
            cron,
            waiter,
            cron_jobs: DashMap::new(),
            listeners: DashMap::new(),
        }
    }

    /// Registers a cron job for `node_id` and records its scheduler job id.
    pub async fn setup_cron(
        &self,
        node_id: &str,
        cron_expr: &str,
        on_tick: TickCallback,
    ) -> Result<(), DeploymentError> {
        let job_id = self
            .cron
            .register_cron_job(cron_expr, on_tick, node_id.to_string())
            .await?;
        self.cron_jobs.insert(node_id.to_string(), job_id);
        info!(node_id, cron_expr, "cron trigger registered");
        Ok(())
    }

    pub async fn teardown_cron(&self, node_id: &str) -> Result<(), DeploymentError> {
        if let Some((_, job_id)) = self.cron_jobs.remove(node_id) {
            self.cron.remove_cron_job(&job_id).await?;
        }
        Ok(())
    }

    pub fn cron_node_ids(&self) -> Vec<String> {
        self.cron_jobs.iter().map(|e| e.key().clone()).collect()
    }

    pub fn cron_job_id(&self, node_id: &str) -> Option<String> {
        self.cron_jobs.get(node_id).map(|e| e.value().clone())
    }

    pub async fn teardown_all_crons(&self) {
        let ids: Vec<String> = self.cron_node_ids();
        for node_id in ids {
            if let Err(e) = self.teardown_cron(&node_id).await {
                warn!(node_id, error = %e, "failed to tear down cron job");
            }
        }
    }

    /// Spawns the collector/processor fiber pair for an event-driven
    /// trigger node: the collector registers a `Waiter` and feeds every
    /// resolution into an `mpsc` channel; the processor drains the channel
    /// and invokes `on_fire` for each payload, then re-registers to keep
    /// listening (mirrors the original's `asyncio.Queue`-backed
    /// collector/processor coroutine pair).
    pub async fn setup_event_trigger(
        &self,
        node_id: &str,
        node_type: &str,
        parameters: Value,
        on_fire: Arc<dyn Fn(String, Value) + Send + Sync>,
    ) {
        let (tx, mut rx) = mpsc::channel::<Value>(16);
        let waiter = Arc::clone(&self.waiter);
        let node_type_owned = node_type.to_string();
        let node_id_owned = node_id.to_string();

        let display_name = waiter
            .registry()
            .display_name_for(node_type)
            .unwrap_or_else(|| node_type.to_string());
        info!(node_id, %display_name, "waiting for event trigger");

        let collector = tokio::spawn(async move {
            loop {
                let w = waiter.register(&node_type_owned, &node_id_owned, parameters.clone()).await;
                match waiter.wait(w).await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let node_id_for_processor = node_id.to_string();
        let processor = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                on_fire(node_id_for_processor.clone(), payload);
            }
        });

        self.listeners.insert(node_id.to_string(), ListenerHandle { collector, processor });
    }

    pub fn listener_node_ids(&self) -> Vec<String> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn teardown_all_listeners(&self) {
        let ids: Vec<String> = self.listener_node_ids();
        self.teardown_listeners_for(&ids).await;
    }

    /// Tears down only the listed node ids' listeners, leaving every other
    /// deployment's event triggers untouched — the scoped counterpart of
    /// `teardown_all_listeners`, since `TriggerManager` is shared across
    /// every deployed workflow.
    pub async fn teardown_listeners_for(&self, node_ids: &[String]) {
        for node_id in node_ids {
            if let Some((_, handle)) = self.listeners.remove(node_id) {
                handle.collector.abort();
                handle.processor.abort();
            }
            self.waiter.cancel_for_node(node_id).await;
        }
    }

    /// Whether `node_type` is registered with an event type in the waiter's
    /// trigger registry — the criterion distinguishing a `start`-like
    /// trigger (fires immediately, no listener) from an event trigger
    /// (webhook, messaging, ...) that needs a collector/processor pair.
    pub fn is_event_trigger(&self, node_type: &str) -> bool {
        self.waiter.registry().event_type_for(node_type).is_some()
    }
}
