use clap::{Parser, Subcommand};
use reelcraft_core::{OrchestrationError, Planner, ProgressRegistry, Reasoner};
use reelcraft_engine::{
    ConfigError, ConversationEngine, EngineConfig, EngineConfigBuilder, ExecutionStrategy,
    OpenAiClient, PlanEngine, StrategyKind, TaskRunner,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

mod offline;
mod studio;

use offline::{OfflinePlanner, OfflineReasoner};

#[derive(Parser, Debug)]
#[command(name = "reelcraft", version)]
#[command(about = "Reelcraft CLI - reasoning-driven video pipeline orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a video task to completion
    Run {
        /// Execution strategy (plan, conversation); overrides REELCRAFT_STRATEGY
        #[arg(long)]
        strategy: Option<StrategyKind>,
        /// What the video should be about
        #[arg(long)]
        request: String,
        /// Task id (default: random UUID)
        #[arg(long)]
        task_id: Option<String>,
        /// Use the built-in deterministic planner instead of the reasoning engine
        #[arg(long)]
        offline: bool,
    },
    /// Print the capability catalog as JSON
    Catalog,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            strategy,
            request,
            task_id,
            offline,
        } => run(strategy, request, task_id, offline).await,
        Commands::Catalog => catalog(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(strategy: Option<StrategyKind>) -> Result<EngineConfig, CliError> {
    let mut builder = EngineConfigBuilder::from_env()?;
    if let Some(strategy) = strategy {
        builder = builder.strategy(strategy);
    }
    Ok(builder.build()?)
}

fn catalog() -> Result<(), CliError> {
    let config = load_config(None)?;
    let registry = studio::registry(config.capability_timeout);
    println!("{}", serde_json::to_string_pretty(&registry.schema_catalog())?);
    Ok(())
}

fn build_strategy(
    config: &EngineConfig,
    request: &str,
    offline: bool,
) -> Result<Arc<dyn ExecutionStrategy>, CliError> {
    let registry = Arc::new(studio::registry(config.capability_timeout));

    let offline = offline || config.llm.api_key.is_none();
    if offline {
        warn!("Using the offline planner; set OPENAI_API_KEY to use the reasoning engine");
    }
    let client = if offline {
        None
    } else {
        Some(Arc::new(OpenAiClient::new(config.llm.clone())?))
    };

    let strategy: Arc<dyn ExecutionStrategy> = match config.strategy {
        StrategyKind::Plan => {
            let planner: Arc<dyn Planner> = match client {
                Some(client) => client,
                None => Arc::new(OfflinePlanner),
            };
            Arc::new(PlanEngine::new(registry, planner).with_config(config.plan_engine()))
        }
        StrategyKind::Conversation => {
            let reasoner: Arc<dyn Reasoner> = match client {
                Some(client) => client,
                None => Arc::new(OfflineReasoner::new(request)),
            };
            Arc::new(
                ConversationEngine::new(registry, reasoner).with_config(config.conversation()),
            )
        }
    };
    Ok(strategy)
}

async fn run(
    strategy: Option<StrategyKind>,
    request: String,
    task_id: Option<String>,
    offline: bool,
) -> Result<(), CliError> {
    let config = load_config(strategy)?;
    let engine = build_strategy(&config, &request, offline)?;
    let runner = TaskRunner::new(ProgressRegistry::shared());

    info!(strategy = %config.strategy, "Starting task");
    let handle = match task_id {
        Some(task_id) => runner.spawn_with_id(task_id, request, engine).await?,
        None => runner.spawn(request, engine).await?,
    };

    let interrupt = runner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling tasks");
            interrupt.shutdown();
        }
    });

    let report = handle.join().await?;
    let progress = runner.progress().get(&report.task_id).await;

    let (outcome, error) = match &report.outcome {
        Ok(outcome) => (Some(outcome), None),
        Err(e) => (None, Some(e.to_string())),
    };
    let summary = json!({
        "task_id": report.task_id,
        "status": report.status(),
        "progress": progress,
        "message": outcome.map(|outcome| outcome.message.clone()),
        "output": outcome.map(|outcome| &outcome.output),
        "error": error,
        "resources": report.context.resources(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match report.outcome {
        Ok(_) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
