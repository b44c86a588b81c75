//! Workflow orchestration core.
//!
//! Tracks in-flight runs of the multi-agent coding pipeline, advances them
//! stage by stage, applies the workflow gate, and persists a snapshot after
//! every observable change.
//!
//! # Architecture
//!
//! - **Record**: `WorkflowRun`, the status state machine and stage lists
//! - **Registry**: concurrent id to record map with id generation
//! - **Executor**: the `PipelineExecutor` seam and its `StageReporter`
//! - **Runner**: the per-run worker task
//! - **Gate**: the post-completion check script
//! - **Snapshot / Error log**: external documents written along the way
//! - **Orchestrator**: the entry point tying it together
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workflow_forge::pipeline::{CommandExecutor, WorkflowConfig, WorkflowOrchestrator};
//!
//! let config = WorkflowConfig::from_env()?;
//! let executor = Arc::new(CommandExecutor::new("./run_pipeline.sh"));
//! let orchestrator = WorkflowOrchestrator::new(config, executor)?;
//!
//! let started = orchestrator.start("add a login page", None, false)?;
//! let run = orchestrator.wait(&started.workflow_id).await?;
//! println!("{} finished as {}", run.workflow_id, run.status);
//! ```

pub mod config;
pub mod detector;
pub mod error_log;
pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod quality;
pub mod record;
pub mod registry;
mod runner;
pub mod snapshot;

pub use config::{ConfigError, WorkflowConfig};
pub use detector::{Detection, RequestClassifier, WorkflowType};
pub use error_log::ErrorLog;
pub use executor::{CommandExecutor, PipelineExecutor, PipelineInput, PipelineOutput, StageReporter};
pub use gate::{GateChecker, GateMode, GateOutcome, GateVerdict};
pub use orchestrator::{OrchestratorStats, StartedWorkflow, WorkflowOrchestrator};
pub use quality::{QualityGates, StageGateResult};
pub use record::{
    default_stages, LoopDecision, WorkflowRun, WorkflowStatus, DEFAULT_STAGES, REVIEWER_LOOP,
    TESTING_LOOP,
};
pub use registry::RunRegistry;
pub use snapshot::{SnapshotWriter, WorkflowStateDocument};
