//! Demonstration node handlers (§4.4): just enough concrete node types to
//! exercise the DAG engine end-to-end. Not a reimplementation of the
//! original's AI/Android/messaging handlers, which stay out of scope.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use flowgraph_engine::{HandlerOutcome, NodeExecContext, NodeHandler};

/// `httpRequest`: issues a GET/POST via `reqwest` using `url`/`method`/
/// `body` parameters, classified per Table 7-A by the executor's retry
/// policy (this handler just surfaces the error text verbatim so the
/// retry classifier's substring match has something to match against).
pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    async fn execute(
        &self,
        _node_type: &str,
        parameters: &HashMap<String, Value>,
        _ctx: &NodeExecContext,
    ) -> HandlerOutcome {
        let Some(url) = parameters.get("url").and_then(|v| v.as_str()) else {
            return HandlerOutcome::failure("httpRequest: missing required parameter 'url'");
        };
        let method = parameters.get("method").and_then(|v| v.as_str()).unwrap_or("GET").to_uppercase();

        let mut request = match method.as_str() {
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            _ => self.client.get(url),
        };
        if let Some(body) = parameters.get("body") {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return HandlerOutcome::failure(format!("httpRequest connection error: {e}")),
        };

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            HandlerOutcome::success(json!({"status": status.as_u16(), "body": body}))
        } else {
            HandlerOutcome::failure(format!("httpRequest received {} from {url}", status.as_u16()))
        }
    }
}

/// `code`: a tiny expression block standing in for the out-of-scope code
/// executor, supporting `action: sleep|log|echo`.
pub struct CodeBlockHandler;

#[async_trait]
impl NodeHandler for CodeBlockHandler {
    async fn execute(
        &self,
        _node_type: &str,
        parameters: &HashMap<String, Value>,
        _ctx: &NodeExecContext,
    ) -> HandlerOutcome {
        match parameters.get("action").and_then(|v| v.as_str()).unwrap_or("echo") {
            "sleep" => {
                let ms = parameters.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                HandlerOutcome::success(json!({"slept_ms": ms}))
            }
            "log" => {
                let message = parameters.get("message").and_then(|v| v.as_str()).unwrap_or("");
                info!(message, "code block log");
                HandlerOutcome::success(json!({"logged": message}))
            }
            _ => HandlerOutcome::success(json!({"echo": parameters})),
        }
    }
}

/// `log`: unconditionally succeeds, emitting `message` via `tracing`.
pub struct LogHandler;

#[async_trait]
impl NodeHandler for LogHandler {
    async fn execute(
        &self,
        _node_type: &str,
        parameters: &HashMap<String, Value>,
        ctx: &NodeExecContext,
    ) -> HandlerOutcome {
        let message = parameters.get("message").and_then(|v| v.as_str()).unwrap_or("");
        info!(node_id = %ctx.node_id, message, "log node");
        HandlerOutcome::success(json!({"logged": message}))
    }
}
