//! Workflow configuration for the orchestrator.
//!
//! This module provides configuration for the workflow service: workspace
//! layout (where snapshots, error logs and gate scripts live), gate
//! invocation, rework loop ceilings and the stage sequence.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::gate::GateMode;
use super::quality::QualityGates;
use super::record::default_stages;

/// File name of the persisted workflow state document.
pub const STATE_FILENAME: &str = "workflow_state.json";

/// Default gate script name, resolved against the scripts directory.
pub const DEFAULT_GATE_SCRIPT: &str = "workflow_gate.sh";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the workflow orchestrator.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    // Workspace layout
    /// Root of the workspace; the gate runs with this as working directory.
    pub workspace_root: PathBuf,
    /// Directory holding the shared workflow state document.
    pub shared_dir: PathBuf,
    /// Directory holding logs; error documents go to `<logs_dir>/errors`.
    pub logs_dir: PathBuf,
    /// Directory holding helper scripts such as the workflow gate.
    pub scripts_dir: PathBuf,

    // Gate settings
    /// Gate script file name inside `scripts_dir`.
    pub gate_script: String,
    /// Optional interpreter used to run the gate script (e.g. `sh`).
    pub gate_interpreter: Option<String>,
    /// Upper bound on a single gate invocation.
    pub gate_timeout: Duration,
    /// Mode passed to the gate after a successful pipeline.
    pub gate_mode: GateMode,

    // Loop and scoring settings
    /// Rework loop ceiling before a run is flagged for human review.
    pub max_loops: u32,
    /// Final score used when neither the pipeline nor the stages report one.
    pub default_final_score: f64,
    /// Per-stage minimum scores.
    pub quality_gates: QualityGates,

    // Pipeline shape
    /// Canonical stage sequence.
    pub stages: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let workspace_root = PathBuf::from(".");
        Self {
            shared_dir: workspace_root.join("data").join("shared"),
            logs_dir: workspace_root.join("logs"),
            scripts_dir: workspace_root.join("scripts"),
            workspace_root,

            gate_script: DEFAULT_GATE_SCRIPT.to_string(),
            gate_interpreter: None,
            gate_timeout: Duration::from_secs(120),
            gate_mode: GateMode::Autofix,

            max_loops: 3,
            default_final_score: 90.0,
            quality_gates: QualityGates::default(),

            stages: default_stages(),
        }
    }
}

impl WorkflowConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `WORKFLOW_WORKSPACE_ROOT`: Workspace root; rebases the directories below (default: .)
    /// - `WORKFLOW_SHARED_DIR`: State document directory (default: <root>/data/shared)
    /// - `WORKFLOW_LOGS_DIR`: Log directory (default: <root>/logs)
    /// - `WORKFLOW_SCRIPTS_DIR`: Script directory (default: <root>/scripts)
    /// - `WORKFLOW_GATE_SCRIPT`: Gate script name (default: workflow_gate.sh)
    /// - `WORKFLOW_GATE_INTERPRETER`: Interpreter for the gate script (default: none)
    /// - `WORKFLOW_GATE_TIMEOUT_SECS`: Gate timeout in seconds (default: 120)
    /// - `WORKFLOW_GATE_MODE`: `autofix` or `check` (default: autofix)
    /// - `WORKFLOW_MAX_LOOPS`: Rework loop ceiling (default: 3)
    /// - `WORKFLOW_DEFAULT_FINAL_SCORE`: Fallback final score (default: 90.0)
    /// - `WORKFLOW_STAGES`: Comma-separated stage sequence
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("WORKFLOW_WORKSPACE_ROOT") {
            config = config.with_workspace_root(val);
        }

        if let Ok(val) = std::env::var("WORKFLOW_SHARED_DIR") {
            config.shared_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("WORKFLOW_LOGS_DIR") {
            config.logs_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("WORKFLOW_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(val);
        }

        // Gate settings
        if let Ok(val) = std::env::var("WORKFLOW_GATE_SCRIPT") {
            config.gate_script = val;
        }

        if let Ok(val) = std::env::var("WORKFLOW_GATE_INTERPRETER") {
            config.gate_interpreter = Some(val).filter(|v| !v.trim().is_empty());
        }

        if let Ok(val) = std::env::var("WORKFLOW_GATE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "WORKFLOW_GATE_TIMEOUT_SECS")?;
            config.gate_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("WORKFLOW_GATE_MODE") {
            config.gate_mode = parse_env_value(&val, "WORKFLOW_GATE_MODE")?;
        }

        // Loop and scoring settings
        if let Ok(val) = std::env::var("WORKFLOW_MAX_LOOPS") {
            config.max_loops = parse_env_value(&val, "WORKFLOW_MAX_LOOPS")?;
        }

        if let Ok(val) = std::env::var("WORKFLOW_DEFAULT_FINAL_SCORE") {
            config.default_final_score = parse_env_value(&val, "WORKFLOW_DEFAULT_FINAL_SCORE")?;
        }

        if let Ok(val) = std::env::var("WORKFLOW_STAGES") {
            config.stages = parse_stage_list(&val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "stages cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "stages cannot contain empty names".to_string(),
                ));
            }
            if !seen.insert(stage.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "stages contain duplicate name '{}'",
                    stage
                )));
            }
        }

        if self.gate_script.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "gate_script cannot be empty".to_string(),
            ));
        }

        if self.gate_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "gate_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_loops == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_loops must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.default_final_score) {
            return Err(ConfigError::ValidationFailed(
                "default_final_score must be between 0 and 100".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the shared workflow state document.
    pub fn snapshot_path(&self) -> PathBuf {
        self.shared_dir.join(STATE_FILENAME)
    }

    /// Directory receiving one error document per failed run.
    pub fn error_log_dir(&self) -> PathBuf {
        self.logs_dir.join("errors")
    }

    /// Full path of the gate script.
    pub fn gate_script_path(&self) -> PathBuf {
        self.scripts_dir.join(&self.gate_script)
    }

    /// Builder method to set the workspace root; rebases shared, logs and scripts directories.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.shared_dir = root.join("data").join("shared");
        self.logs_dir = root.join("logs");
        self.scripts_dir = root.join("scripts");
        self.workspace_root = root;
        self
    }

    /// Builder method to set the shared state directory.
    pub fn with_shared_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_dir = dir.into();
        self
    }

    /// Builder method to set the logs directory.
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    /// Builder method to set the scripts directory.
    pub fn with_scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = dir.into();
        self
    }

    /// Builder method to set the gate script name.
    pub fn with_gate_script(mut self, script: impl Into<String>) -> Self {
        self.gate_script = script.into();
        self
    }

    /// Builder method to set the gate interpreter.
    pub fn with_gate_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.gate_interpreter = Some(interpreter.into());
        self
    }

    /// Builder method to set the gate timeout.
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = timeout;
        self
    }

    /// Builder method to set the gate mode.
    pub fn with_gate_mode(mut self, mode: GateMode) -> Self {
        self.gate_mode = mode;
        self
    }

    /// Builder method to set the rework loop ceiling.
    pub fn with_max_loops(mut self, max_loops: u32) -> Self {
        self.max_loops = max_loops;
        self
    }

    /// Builder method to set the fallback final score.
    pub fn with_default_final_score(mut self, score: f64) -> Self {
        self.default_final_score = score;
        self
    }

    /// Builder method to set the per-stage quality gates.
    pub fn with_quality_gates(mut self, gates: QualityGates) -> Self {
        self.quality_gates = gates;
        self
    }

    /// Builder method to set the stage sequence.
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Split a comma-separated stage list, dropping blanks.
fn parse_stage_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.gate_timeout, Duration::from_secs(120));
        assert_eq!(config.gate_mode, GateMode::Autofix);
        assert_eq!(config.max_loops, 3);
        assert!((config.default_final_score - 90.0).abs() < f64::EPSILON);
        assert_eq!(config.stages.len(), 9);
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("./data/shared/workflow_state.json")
        );
        assert_eq!(config.error_log_dir(), PathBuf::from("./logs/errors"));
        assert_eq!(
            config.gate_script_path(),
            PathBuf::from("./scripts/workflow_gate.sh")
        );
    }

    #[test]
    fn test_workspace_root_rebases_directories() {
        let config = WorkflowConfig::new().with_workspace_root("/srv/team");
        assert_eq!(config.shared_dir, PathBuf::from("/srv/team/data/shared"));
        assert_eq!(config.logs_dir, PathBuf::from("/srv/team/logs"));
        assert_eq!(config.scripts_dir, PathBuf::from("/srv/team/scripts"));
    }

    #[test]
    fn test_config_builder() {
        let config = WorkflowConfig::new()
            .with_gate_script("gate.sh")
            .with_gate_interpreter("sh")
            .with_gate_timeout(Duration::from_secs(5))
            .with_gate_mode(GateMode::Check)
            .with_max_loops(5)
            .with_default_final_score(75.0)
            .with_stages(vec!["a".to_string(), "b".to_string()]);

        assert_eq!(config.gate_script, "gate.sh");
        assert_eq!(config.gate_interpreter.as_deref(), Some("sh"));
        assert_eq!(config.gate_timeout, Duration::from_secs(5));
        assert_eq!(config.gate_mode, GateMode::Check);
        assert_eq!(config.max_loops, 5);
        assert_eq!(config.stages, vec!["a".to_string(), "b".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(WorkflowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_empty_stages() {
        let result = WorkflowConfig::default().with_stages(Vec::new()).validate();
        assert!(result.unwrap_err().to_string().contains("stages"));
    }

    #[test]
    fn test_validation_duplicate_stage() {
        let result = WorkflowConfig::default()
            .with_stages(vec!["a".to_string(), "a".to_string()])
            .validate();
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_validation_zero_timeout() {
        let result = WorkflowConfig::default()
            .with_gate_timeout(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("gate_timeout"));
    }

    #[test]
    fn test_validation_zero_loops() {
        let result = WorkflowConfig::default().with_max_loops(0).validate();
        assert!(result.unwrap_err().to_string().contains("max_loops"));
    }

    #[test]
    fn test_validation_final_score_range() {
        let result = WorkflowConfig::default()
            .with_default_final_score(120.0)
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("default_final_score"));
    }

    #[test]
    fn test_parse_stage_list() {
        assert_eq!(
            parse_stage_list(" plan, build ,,ship "),
            vec!["plan".to_string(), "build".to_string(), "ship".to_string()]
        );
    }

    #[test]
    fn test_parse_env_value() {
        let secs: u64 = parse_env_value(" 30 ", "KEY").unwrap();
        assert_eq!(secs, 30);

        let err = parse_env_value::<u32>("abc", "WORKFLOW_MAX_LOOPS").unwrap_err();
        assert!(err.to_string().contains("WORKFLOW_MAX_LOOPS"));

        let mode: GateMode = parse_env_value("check", "WORKFLOW_GATE_MODE").unwrap();
        assert_eq!(mode, GateMode::Check);
    }
}
