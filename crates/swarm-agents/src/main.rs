use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use coordination::ledger::Ledger;
use coordination::model::{Subtask, SubtaskType};
use coordination::quality_gate::QualityGateConfig;
use swarm_agents::config::SwarmAgentsConfig;
use swarm_agents::orchestrator::{DecomposeError, Decomposer, OrchestratorRunConfig, SwarmOrchestrator, WorkerAssigner};
use swarm_agents::pool::{Assignment, WorkerContext, WorkerExecutor, WorkerRunError, WorkerRunResult};
use tracing::{error, info};
use uuid::Uuid;

/// Execution control plane CLI for a multi-agent code-modification swarm.
#[derive(Parser, Debug)]
#[command(name = "swarm-agents", version, about)]
struct Cli {
    /// The goal to decompose and execute.
    goal: String,

    /// Cap on concurrently dispatched workers; overrides the env default.
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Path to a config file (currently env-vars only; reserved for future use).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory persistence adapters should use. Ignored unless built
    /// with the `heavy-state` feature.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Increase log verbosity; repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Treats the whole goal as a single non-parallelizable subtask. Real
/// decomposition is an LM call the binary surface does not make on its
/// own; wire a real [`Decomposer`] via the library API for that.
struct SingleSubtaskDecomposer;

#[async_trait]
impl Decomposer for SingleSubtaskDecomposer {
    async fn decompose(&self, goal: &str) -> Result<Vec<Subtask>, DecomposeError> {
        Ok(vec![Subtask {
            id: "goal".to_string(),
            description: goal.to_string(),
            kind: SubtaskType::Implement,
            complexity: 3,
            dependencies: Default::default(),
            parallelizable: false,
            relevant_files: Vec::new(),
        }])
    }
}

struct DefaultModelAssigner {
    model_id: String,
    fallback_models: Vec<String>,
}

impl WorkerAssigner for DefaultModelAssigner {
    fn assign(&self, subtask: &Subtask) -> Option<Assignment> {
        Some(Assignment {
            worker: coordination::model::Worker {
                name: format!("worker-{}", subtask.id),
                default_model: self.model_id.clone(),
                capabilities: Default::default(),
                policy_profile: None,
                allowed_tools: None,
                denied_tools: None,
            },
            model_id: self.model_id.clone(),
            fallback_models: self.fallback_models.clone(),
        })
    }
}

/// No concrete provider ships with this crate; wire one in via the
/// library API. The CLI surface alone cannot run a subtask end to end.
struct NotConfiguredExecutor;

#[async_trait]
impl WorkerExecutor for NotConfiguredExecutor {
    async fn run(&self, _ctx: WorkerContext) -> Result<WorkerRunResult, WorkerRunError> {
        Err(WorkerRunError::Executor(
            "no provider configured; wire a WorkerExecutor via the library API".to_string(),
        ))
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(path) = &cli.config {
        info!(path = %path.display(), "config file support is env-var-backed only; ignoring file path");
    }
    if let Some(path) = &cli.state_dir {
        info!(path = %path.display(), "state dir accepted; persistence defaults to in-memory unless built with the heavy-state feature");
    }

    let mut config = SwarmAgentsConfig::from_env();
    if let Some(max_concurrency) = cli.max_concurrency {
        config.pool.max_concurrency = max_concurrency;
    }

    let ledger = Arc::new(Ledger::new());
    let orchestrator = SwarmOrchestrator::new(
        OrchestratorRunConfig {
            max_decomposition_retries: config.orchestrator_run.max_decomposition_retries,
            global_loop_pause_ms: config.orchestrator_run.global_loop_pause_ms,
        },
        config.pool.clone(),
        config.coordination.budget.clone(),
        config.coordination.shared_economics.clone(),
        Arc::new(SingleSubtaskDecomposer),
        Arc::new(DefaultModelAssigner {
            model_id: config.default_model.model_id.clone(),
            fallback_models: config.default_model.fallback_models.clone(),
        }),
        Arc::new(NotConfiguredExecutor),
        ledger,
    );

    let session_id = Uuid::new_v4().to_string();
    let mut events = orchestrator.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(event = event.event_type(), session = event.session_id(), "swarm event");
        }
    });

    let result = orchestrator.run(&session_id, &cli.goal, QualityGateConfig::default()).await;

    info!(succeeded = result.succeeded, failed = result.failed, skipped = result.skipped, "swarm run finished");

    if result.failed > 0 {
        error!("swarm run completed with failures");
        std::process::exit(1);
    }
}
