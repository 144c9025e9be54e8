//! `agentflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: validate a workflow definition JSON file.
//! - `run`: execute a workflow definition in-process and stream its
//!   progress events to stdout.
//! - `node-types`: list the built-in node types.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::models::{ExecutionStatus, TriggerType, WorkflowRow, WorkflowStatus};
use db::{MemoryStore, WorkflowRepository};
use engine::{
    EngineConfig, ExecutionEngine, ProgressBroadcaster, SubscriptionScope, TriggerDispatcher,
    WorkflowDefinition,
};
use nodes::builtin_registry;

#[derive(Parser)]
#[command(name = "agentflow", about = "DAG workflow execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow definition and print its progress events.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Trigger payload handed to the entry nodes, as JSON.
        #[arg(long, default_value = "null")]
        input: String,
        /// Maximum number of nodes running at once (0 = unbounded).
        #[arg(long, env = "AGENTFLOW_MAX_CONCURRENCY", default_value_t = engine::config::DEFAULT_MAX_CONCURRENCY)]
        max_concurrency: usize,
        /// Cancel the execution if it runs longer than this many seconds.
        #[arg(long, env = "AGENTFLOW_EXECUTION_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,
    },
    /// List the built-in node types.
    NodeTypes,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Run {
            path,
            input,
            max_concurrency,
            timeout_secs,
        } => {
            let mut config = if max_concurrency == 0 {
                EngineConfig::unbounded()
            } else {
                EngineConfig::default().with_max_concurrency(max_concurrency)
            };
            if let Some(secs) = timeout_secs {
                config = config.with_execution_timeout(Duration::from_secs(secs));
            }
            run(&path, &input, config).await
        }
        Command::NodeTypes => {
            for node_type in builtin_registry().node_types() {
                println!("{node_type}");
            }
            Ok(())
        }
    }
}

fn read_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a workflow definition", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let definition = read_definition(path)?;

    match engine::validate(&definition, &builtin_registry()) {
        Ok(plan) => {
            println!("✓ workflow is valid");
            for (depth, layer) in plan.layers().iter().enumerate() {
                println!("  layer {depth}: {}", layer.join(", "));
            }
            let unreachable: Vec<&str> = definition
                .nodes
                .iter()
                .filter(|n| !plan.is_reachable(&n.id))
                .map(|n| n.id.as_str())
                .collect();
            if !unreachable.is_empty() {
                println!("  unreachable (never executed): {}", unreachable.join(", "));
            }
            Ok(())
        }
        Err(errors) => {
            for err in &errors {
                eprintln!("✗ {err}");
            }
            bail!("workflow is invalid ({} error(s))", errors.len())
        }
    }
}

async fn run(path: &Path, input: &str, config: EngineConfig) -> Result<()> {
    let definition = read_definition(path)?;
    let payload: Value = serde_json::from_str(input).context("--input is not valid JSON")?;

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(ExecutionEngine::new(
        builtin_registry(),
        store.clone(),
        Arc::new(ProgressBroadcaster::new()),
        config,
    ));
    let dispatcher = TriggerDispatcher::new(engine.clone(), store.clone());

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".into());
    let workflow = store
        .create_workflow(WorkflowRow::new(
            name,
            WorkflowStatus::Active,
            TriggerType::Manual,
            serde_json::to_value(&definition)?,
        ))
        .await?;

    let mut events = engine
        .broadcaster()
        .subscribe(SubscriptionScope::Workflow(workflow.id));
    let execution_id = dispatcher
        .on_trigger(workflow.id, TriggerType::Manual, payload)
        .await?;
    info!(%execution_id, "execution started");

    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.is_terminal() {
            break;
        }
    }

    let result = engine.get_status(execution_id).await?;
    eprintln!("{}", serde_json::to_string_pretty(&result)?);

    match result.execution.status {
        ExecutionStatus::Completed => Ok(()),
        status => bail!(
            "execution {status}: {}",
            result.execution.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}
