use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waypoint_core::traits::TaskStore;
use waypoint_core::types::{InvokeMode, SystemContext};
use waypoint_core::EngineConfig;
use waypoint_delegate::{Delegations, ModelRegistry, ToolRegistry};
use waypoint_engine::{
    AsyncTaskCoordinator, AsyncWorker, ChannelSubmitter, FlowDefinition, FlowRunner, RunOutcome,
    SqliteTaskStore,
};

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Resumable flow-step execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "waypoint.toml", env = "WAYPOINT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow definition and print each node visit as JSON
    Run {
        /// Flow definition (TOML)
        flow: PathBuf,
        /// Request parameter, `key=value`. Values that parse as JSON are kept typed.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        /// Hand every step to the async worker and resume on its callbacks
        #[arg(long = "async")]
        run_async: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {}", raw))?;
    if key.is_empty() {
        return Err("parameter key is empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if path.exists() {
        Ok(EngineConfig::load(path)?)
    } else {
        Ok(EngineConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before loading config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "waypoint", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file, using defaults");
    }

    match cli.command {
        Commands::Run {
            flow,
            params,
            run_async,
        } => run_flow(&config, &flow, params, run_async).await,
        Commands::Completions { .. } => Ok(()),
    }
}

async fn run_flow(
    config: &EngineConfig,
    flow: &Path,
    params: Vec<(String, Value)>,
    run_async: bool,
) -> anyhow::Result<()> {
    let graph = FlowDefinition::load(flow)?.into_graph()?;

    let delegations = Delegations::standard(
        Arc::new(ToolRegistry::with_builtins()),
        Arc::new(ModelRegistry::with_builtins()),
        Duration::from_secs(config.engine.tool_timeout_secs),
    );
    let mode = if run_async {
        InvokeMode::Async
    } else {
        config.engine.invoke_mode
    };
    let context =
        SystemContext::new(mode).with_parameters(params.into_iter().collect::<HashMap<_, _>>());
    let runner =
        FlowRunner::new(delegations.clone()).with_max_node_visits(config.engine.max_node_visits);

    info!(flow = %flow.display(), invoke_mode = %mode, "Running flow");

    let outcome = match mode {
        InvokeMode::Sync => runner.run(&graph, context).await?,
        InvokeMode::Async => {
            let store: Arc<dyn TaskStore> = match config.tasks.store_path() {
                Some(path) => Arc::new(SqliteTaskStore::open(&path)?),
                None => Arc::new(SqliteTaskStore::open_in_memory()?),
            };
            let (submitter, requests) = ChannelSubmitter::channel(config.tasks.worker_queue);
            let (callback_tx, mut callbacks) = mpsc::channel(config.tasks.worker_queue.max(1));
            let cancel = CancellationToken::new();
            let worker = tokio::spawn(AsyncWorker::new(delegations).run(
                requests,
                callback_tx,
                cancel.clone(),
            ));

            let coordinator = Arc::new(AsyncTaskCoordinator::new(store, Arc::new(submitter)));
            let outcome = runner
                .with_coordinator(coordinator)
                .run_to_completion(
                    &graph,
                    context,
                    &mut callbacks,
                    config.tasks.callback_max_wait(),
                )
                .await;

            cancel.cancel();
            if let Err(e) = worker.await {
                warn!(error = %e, "Async worker did not stop cleanly");
            }
            outcome?
        }
    };

    for visit in outcome.trace() {
        println!("{}", serde_json::to_string(visit)?);
    }

    let failed = outcome
        .trace()
        .iter()
        .filter(|v| !v.result.is_success())
        .count();
    match &outcome {
        RunOutcome::Completed { run_id, trace, .. } => {
            info!(run_id = %run_id, visits = trace.len(), failed, "Flow completed")
        }
        RunOutcome::Paused {
            run_id, node_id, ..
        } => warn!(run_id = %run_id, node_id = %node_id, "Flow left paused"),
    }

    Ok(())
}
