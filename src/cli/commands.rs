//! CLI command definitions for workflow-forge.
//!
//! `run` drives one workflow end to end against an external pipeline
//! command, `state` prints the shared state document, `gate` runs the
//! workflow gate on its own, `detect` classifies a request, and `health`
//! checks the local setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::{StartWorkflowRequest, WorkflowResultResponse, WorkflowService, SERVICE_NAME};
use crate::metrics;
use crate::pipeline::snapshot::read_document;
use crate::pipeline::{
    CommandExecutor, GateChecker, GateMode, RequestClassifier, WorkflowConfig,
    WorkflowOrchestrator, WorkflowStatus,
};

/// Default timeout of the pipeline command.
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 3600;

/// Multi-agent coding workflow orchestrator.
#[derive(Parser)]
#[command(name = "workflow-forge")]
#[command(about = "Run requests through a staged multi-agent coding pipeline")]
#[command(version)]
#[command(
    long_about = "workflow-forge runs a work request through a fixed sequence of agent stages, applies a workflow gate, and keeps a JSON state document up to date.\n\nConfiguration comes from WORKFLOW_* environment variables.\n\nExample usage:\n  workflow-forge run \"add a login page\" --pipeline-command ./run_pipeline.sh"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a workflow and wait for it to finish.
    Run(RunArgs),

    /// Print the shared workflow state document.
    State(StateArgs),

    /// Run the workflow gate once.
    Gate(GateArgs),

    /// Classify a request as simple or complex.
    Detect(DetectArgs),

    /// Check configuration and report service health.
    Health(HealthArgs),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// The work request.
    pub request: String,

    /// Optional project label.
    #[arg(short = 'p', long)]
    pub project_name: Option<String>,

    /// Skip request classification.
    #[arg(long)]
    pub force_full: bool,

    /// Command that executes the pipeline.
    #[arg(long, env = "WORKFLOW_PIPELINE_COMMAND")]
    pub pipeline_command: String,

    /// Extra argument for the pipeline command (repeatable).
    #[arg(long = "pipeline-arg", allow_hyphen_values = true)]
    pub pipeline_args: Vec<String>,

    /// Pipeline timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_PIPELINE_TIMEOUT_SECS)]
    pub pipeline_timeout_secs: u64,

    /// Workspace root; overrides WORKFLOW_WORKSPACE_ROOT.
    #[arg(short = 'w', long)]
    pub workspace_root: Option<PathBuf>,

    /// Progress poll interval in milliseconds.
    #[arg(long, default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Print the result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the `state` command.
#[derive(Parser, Debug)]
pub struct StateArgs {
    /// Path of the state document; defaults to the configured location.
    #[arg(long)]
    pub path: Option<PathBuf>,
}

/// Arguments for the `gate` command.
#[derive(Parser, Debug)]
pub struct GateArgs {
    /// Gate mode: autofix or check.
    #[arg(short = 'm', long, default_value = "check")]
    pub mode: GateMode,

    /// Workspace root; overrides WORKFLOW_WORKSPACE_ROOT.
    #[arg(short = 'w', long)]
    pub workspace_root: Option<PathBuf>,
}

/// Arguments for the `detect` command.
#[derive(Parser, Debug)]
pub struct DetectArgs {
    /// The request to classify.
    pub request: String,

    /// Report the classification a forced full run would get.
    #[arg(long)]
    pub force_full: bool,

    /// Print the result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the `health` command.
#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Print Prometheus metrics after the health report.
    #[arg(long)]
    pub metrics: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and execute the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_workflow_command(args).await,
        Commands::State(args) => run_state_command(args),
        Commands::Gate(args) => run_gate_command(args).await,
        Commands::Detect(args) => run_detect_command(args),
        Commands::Health(args) => run_health_command(args),
    }
}

fn load_config(workspace_root: Option<PathBuf>) -> anyhow::Result<WorkflowConfig> {
    let config = WorkflowConfig::from_env()?;
    Ok(match workspace_root {
        Some(root) => config.with_workspace_root(root),
        None => config,
    })
}

// ============================================================================
// run
// ============================================================================

async fn run_workflow_command(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(args.workspace_root.clone())?;
    if let Err(e) = metrics::init_metrics() {
        warn!("Metrics disabled: {}", e);
    }

    let executor = CommandExecutor::new(&args.pipeline_command)
        .with_args(args.pipeline_args.clone())
        .with_working_dir(&config.workspace_root)
        .with_timeout(Duration::from_secs(args.pipeline_timeout_secs));
    let orchestrator = Arc::new(WorkflowOrchestrator::new(config, Arc::new(executor))?);
    let service = WorkflowService::new(Arc::clone(&orchestrator));

    let mut body = StartWorkflowRequest::new(&args.request).with_force_full_workflow(args.force_full);
    if let Some(name) = &args.project_name {
        body = body.with_project_name(name);
    }
    let started = service.start(body)?;
    let workflow_id = started.workflow_id;
    info!(
        "Started workflow {} ({})",
        workflow_id, started.workflow_type
    );

    let wait = orchestrator.wait(&workflow_id);
    tokio::pin!(wait);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.poll_interval_ms.max(50)));
    let mut interrupted = false;
    let mut last_stage: Option<String> = None;

    let run = loop {
        tokio::select! {
            run = &mut wait => break run?,
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                warn!("Interrupted, cancelling workflow {}", workflow_id);
                if let Err(e) = orchestrator.cancel(&workflow_id, Some("Interrupted by user")) {
                    warn!("Cancel failed: {}", e);
                }
            }
            _ = ticker.tick() => {
                let status = service.status(&workflow_id)?;
                if status.current_agent != last_stage {
                    if let Some(stage) = &status.current_agent {
                        info!(
                            "[{}/{}] {}",
                            status.completed_agents.len() + 1,
                            status.completed_agents.len() + 1 + status.pending_agents.len(),
                            stage
                        );
                    }
                    last_stage = status.current_agent;
                }
            }
        }
    };

    let result = WorkflowResultResponse::from(run);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    match result.status {
        WorkflowStatus::Completed => Ok(()),
        status => Err(anyhow::anyhow!(
            "Workflow {} ended as {}: {}",
            result.workflow_id,
            status,
            result.error.as_deref().unwrap_or("no error recorded")
        )),
    }
}

fn print_result(result: &WorkflowResultResponse) {
    let marker = if result.status == WorkflowStatus::Completed {
        "✓"
    } else {
        "✗"
    };
    println!("{} Workflow {} {}", marker, result.workflow_id, result.status);
    if let Some(score) = result.final_score {
        println!("  Final score: {:.1}", score);
    }
    if let Some(summary) = &result.output_summary {
        println!("  Output: {}", summary);
    }
    if let Some(error) = &result.error {
        println!("  Error: {}", error);
    }
}

// ============================================================================
// state / gate / detect / health
// ============================================================================

fn run_state_command(args: StateArgs) -> anyhow::Result<()> {
    let path = match args.path {
        Some(path) => path,
        None => load_config(None)?.snapshot_path(),
    };
    let document = read_document(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

async fn run_gate_command(args: GateArgs) -> anyhow::Result<()> {
    let config = load_config(args.workspace_root)?;
    let gate = GateChecker::from_config(&config);
    let outcome = gate.check(args.mode).await;

    println!(
        "{} {} ({:.1}s)",
        outcome.verdict.as_str(),
        outcome.message,
        outcome.duration.as_secs_f64()
    );
    match outcome.into_error() {
        None => Ok(()),
        Some(e) => Err(e.into()),
    }
}

fn run_detect_command(args: DetectArgs) -> anyhow::Result<()> {
    let detection = RequestClassifier::new().detect(&args.request, args.force_full);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&detection)?);
    } else {
        println!("Type:       {}", detection.workflow_type);
        println!("Complexity: {}", detection.complexity_score);
        if !detection.matched_keywords.is_empty() {
            println!("Keywords:   {}", detection.matched_keywords.join(", "));
        }
        println!("{}", detection.suggestion);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    workspace_root: String,
    snapshot_path: String,
    gate_script: String,
    gate_script_present: bool,
}

fn run_health_command(args: HealthArgs) -> anyhow::Result<()> {
    let config = load_config(None)?;
    let gate = GateChecker::from_config(&config);

    let report = HealthReport {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        workspace_root: config.workspace_root.display().to_string(),
        snapshot_path: config.snapshot_path().display().to_string(),
        gate_script: gate.script().display().to_string(),
        gate_script_present: gate.is_configured(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.metrics {
        metrics::init_metrics()?;
        print!("{}", metrics::export_metrics());
    }
    Ok(())
}
