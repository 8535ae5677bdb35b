mod classify;
mod config;
mod handlers;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use flowgraph_cache::InMemoryExecutionCache;
use flowgraph_deploy::{DeploymentManager, OnRun, TokioCronScheduler, TriggerManager};
use flowgraph_engine::{ExecutorConfig, HandlerRegistry, WorkflowExecutor};
use flowgraph_events::{EventWaiter, InMemoryWaiterBackend, StatusBroadcaster, TriggerConfig, TriggerRegistry};
use flowgraph_schemas::DeploymentSettings;

use config::CliConfig;
use handlers::{CodeBlockHandler, HttpRequestHandler, LogHandler};

#[derive(Parser)]
#[command(name = "flowgraph")]
#[command(about = "Run or deploy a workflow template against the DAG engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow template once to completion and print the result.
    Run {
        /// Path to a YAML workflow template.
        file: String,
        /// Session id to stamp the run with.
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Deploy a workflow template (wiring up its cron/event triggers) and
    /// block until Ctrl-C, then cancel the deployment.
    Deploy {
        /// Path to a YAML workflow template.
        file: String,
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(long, default_value = "10")]
        max_concurrent_runs: usize,
    },
}

fn handler_registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new(false);
    registry.register("httpRequest", Arc::new(HttpRequestHandler::new()));
    registry.register("code", Arc::new(CodeBlockHandler));
    registry.register("log", Arc::new(LogHandler));
    registry
}

fn trigger_registry() -> TriggerRegistry {
    let registry = TriggerRegistry::new();
    registry.register(
        "webhookTrigger",
        TriggerConfig::new("webhook", "Webhook", |params, payload| {
            params.get("path") == payload.get("path")
        }),
    );
    registry.register("messagingReceive", TriggerConfig::unfiltered("message", "Message"));
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowgraph_cli=info,flowgraph_engine=info,flowgraph_deploy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cache_config = CliConfig::from_env().cache;

    let cache = Arc::new(InMemoryExecutionCache::with_config(cache_config));
    let waiter_registry = Arc::new(trigger_registry());
    let waiter = Arc::new(EventWaiter::new(waiter_registry, Arc::new(InMemoryWaiterBackend::new())));
    let broadcaster = Arc::new(StatusBroadcaster::new(Some(Arc::clone(&waiter))));
    let handlers = Arc::new(handler_registry());

    let executor = Arc::new(WorkflowExecutor::new(
        cache.clone(),
        handlers,
        Some(Arc::clone(&broadcaster)),
        Arc::new(classify::classify),
        ExecutorConfig::default(),
    ));

    match cli.command {
        Commands::Run { file, session } => {
            let definition = workflow::load(&file)?;
            let workflow_id = definition.workflow_id.unwrap_or_else(|| Uuid::now_v7().to_string());
            let result = executor
                .execute_workflow(&workflow_id, &session, definition.nodes, definition.edges)
                .await;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "success": result.success,
                "execution_id": result.execution_id,
                "status": format!("{:?}", result.status),
                "outputs": result.outputs,
                "errors": result.errors,
            }))?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Deploy { file, session, max_concurrent_runs } => {
            let definition = workflow::load(&file)?;
            let workflow_id = definition.workflow_id.unwrap_or_else(|| Uuid::now_v7().to_string());

            let cron = Arc::new(TokioCronScheduler::new().await?);
            let triggers = Arc::new(TriggerManager::new(cron, Arc::clone(&waiter)));

            let run_executor = Arc::clone(&executor);
            let on_run: OnRun = Arc::new(move |workflow_id, session_id, nodes, edges| {
                let executor = Arc::clone(&run_executor);
                tokio::spawn(async move {
                    let result = executor.execute_workflow(&workflow_id, &session_id, nodes, edges).await;
                    tracing::info!(workflow_id, success = result.success, status = ?result.status, "run finished");
                })
            });

            let manager = Arc::new(DeploymentManager::new(
                cache,
                Arc::clone(&broadcaster),
                triggers,
                Arc::new(classify::classify),
                on_run,
            ));

            let settings = DeploymentSettings {
                max_concurrent_runs,
                ..DeploymentSettings::default()
            };
            let result = manager
                .deploy(&workflow_id, &session, definition.nodes, definition.edges, settings)
                .await?;
            tracing::info!(workflow_id, trigger_count = result.trigger_count, "deployed, waiting for Ctrl-C");

            tokio::signal::ctrl_c().await?;
            tracing::info!(workflow_id, "shutdown requested, cancelling deployment");
            manager.cancel(&workflow_id).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    Ok(())
}
