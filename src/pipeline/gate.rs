//! Workflow gate: the post-completion check a run must pass.
//!
//! The gate is an external script invoked with a single mode argument from
//! the workspace root. Its exit code decides the verdict. A missing script
//! passes with an informational message, a hung script is killed at the
//! timeout, and nothing in here ever returns an error to the caller.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::WorkflowError;
use crate::metrics;

use super::config::WorkflowConfig;

/// Mode argument passed to the gate script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Let the gate fix what it can (formatting, lint autofixes) before judging.
    #[default]
    Autofix,
    /// Report only.
    Check,
}

impl GateMode {
    /// Returns the command-line argument for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            GateMode::Autofix => "autofix",
            GateMode::Check => "check",
        }
    }
}

impl std::fmt::Display for GateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "autofix" => Ok(GateMode::Autofix),
            "check" => Ok(GateMode::Check),
            other => Err(format!("unknown gate mode '{}'", other)),
        }
    }
}

/// How a gate invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    /// Script exited 0.
    Passed,
    /// Script not present; treated as a pass.
    Skipped,
    /// Script exited non-zero.
    Failed,
    /// Script exceeded the timeout and was killed.
    TimedOut,
    /// Script could not be run at all.
    Error,
}

impl GateVerdict {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Passed => "passed",
            GateVerdict::Skipped => "skipped",
            GateVerdict::Failed => "failed",
            GateVerdict::TimedOut => "timed_out",
            GateVerdict::Error => "error",
        }
    }
}

/// Result of one gate invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub verdict: GateVerdict,
    /// Diagnostic text: captured output, timeout notice, or spawn error.
    pub message: String,
    pub duration: Duration,
}

impl GateOutcome {
    fn new(verdict: GateVerdict, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            verdict,
            message: message.into(),
            duration,
        }
    }

    /// Returns true if the run may stay completed.
    pub fn passed(&self) -> bool {
        matches!(self.verdict, GateVerdict::Passed | GateVerdict::Skipped)
    }

    /// Converts a failing outcome into the error that demotes the run.
    pub fn into_error(self) -> Option<WorkflowError> {
        match self.verdict {
            GateVerdict::Passed | GateVerdict::Skipped => None,
            GateVerdict::TimedOut => Some(WorkflowError::GateTimeout(self.message)),
            GateVerdict::Failed | GateVerdict::Error => {
                Some(WorkflowError::GateFailure(self.message))
            }
        }
    }
}

/// Runs the workflow gate script with a timeout.
#[derive(Debug, Clone)]
pub struct GateChecker {
    script: PathBuf,
    working_dir: PathBuf,
    interpreter: Option<String>,
    timeout: Duration,
}

impl GateChecker {
    /// Creates a checker for `script`, run from `working_dir`, with the default 120s timeout.
    pub fn new(script: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            working_dir: working_dir.into(),
            interpreter: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Creates a checker from the workflow configuration.
    pub fn from_config(config: &WorkflowConfig) -> Self {
        let checker = Self::new(config.gate_script_path(), &config.workspace_root)
            .with_timeout(config.gate_timeout);
        match &config.gate_interpreter {
            Some(interpreter) => checker.with_interpreter(interpreter.clone()),
            None => checker,
        }
    }

    /// Runs the script through an interpreter instead of executing it directly.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the gate script.
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Returns true if the gate script exists.
    pub fn is_configured(&self) -> bool {
        self.script.is_file()
    }

    /// Runs the gate in the given mode.
    pub async fn check(&self, mode: GateMode) -> GateOutcome {
        let start = Instant::now();
        let outcome = self.invoke(mode, start).await;

        metrics::record_gate_check(outcome.verdict.as_str(), outcome.duration);
        if outcome.passed() {
            info!(
                "Workflow gate ({}) {} in {:?}",
                mode,
                outcome.verdict.as_str(),
                outcome.duration
            );
        } else {
            warn!(
                "Workflow gate ({}) {}: {}",
                mode,
                outcome.verdict.as_str(),
                outcome.message
            );
        }
        outcome
    }

    async fn invoke(&self, mode: GateMode, start: Instant) -> GateOutcome {
        if !self.is_configured() {
            let name = self
                .script
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.script.display().to_string());
            return GateOutcome::new(
                GateVerdict::Skipped,
                format!("{} not found; skipping.", name),
                start.elapsed(),
            );
        }

        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.script);
                cmd
            }
            None => Command::new(&self.script),
        };
        cmd.arg(mode.as_str())
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must take the process down with it.
            .kill_on_drop(true);

        debug!("Running workflow gate {} {}", self.script.display(), mode);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return GateOutcome::new(
                    GateVerdict::Error,
                    format!("Failed to run {}: {}", self.script.display(), e),
                    start.elapsed(),
                )
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

                if output.status.success() {
                    let message = if stdout.is_empty() {
                        "Gate passed.".to_string()
                    } else {
                        stdout
                    };
                    GateOutcome::new(GateVerdict::Passed, message, start.elapsed())
                } else {
                    let message = if !stderr.is_empty() {
                        stderr
                    } else if !stdout.is_empty() {
                        stdout
                    } else {
                        match output.status.code() {
                            Some(code) => format!("Exit code {}", code),
                            None => "Gate terminated by signal".to_string(),
                        }
                    };
                    GateOutcome::new(GateVerdict::Failed, message, start.elapsed())
                }
            }
            Ok(Err(e)) => GateOutcome::new(
                GateVerdict::Error,
                format!("Gate process error: {}", e),
                start.elapsed(),
            ),
            Err(_) => GateOutcome::new(
                GateVerdict::TimedOut,
                format!("Workflow gate timed out after {}s.", self.timeout.as_secs()),
                start.elapsed(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("workflow_gate.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        path
    }

    fn checker(dir: &TempDir, body: &str) -> GateChecker {
        let script = write_script(dir.path(), body);
        GateChecker::new(script, dir.path()).with_interpreter("sh")
    }

    #[test]
    fn test_gate_mode_parse_and_display() {
        assert_eq!("autofix".parse::<GateMode>().unwrap(), GateMode::Autofix);
        assert_eq!(" CHECK ".parse::<GateMode>().unwrap(), GateMode::Check);
        assert!("fix".parse::<GateMode>().is_err());
        assert_eq!(GateMode::Autofix.to_string(), "autofix");
    }

    #[tokio::test]
    async fn test_missing_script_passes() {
        let temp = TempDir::new().unwrap();
        let gate = GateChecker::new(temp.path().join("workflow_gate.sh"), temp.path());

        let outcome = gate.check(GateMode::Autofix).await;
        assert_eq!(outcome.verdict, GateVerdict::Skipped);
        assert!(outcome.passed());
        assert_eq!(outcome.message, "workflow_gate.sh not found; skipping.");
        assert!(outcome.into_error().is_none());
    }

    #[tokio::test]
    async fn test_passing_script_reports_stdout() {
        let temp = TempDir::new().unwrap();
        let gate = checker(&temp, "echo \"all checks green ($1)\"\nexit 0");

        let outcome = gate.check(GateMode::Autofix).await;
        assert_eq!(outcome.verdict, GateVerdict::Passed);
        assert_eq!(outcome.message, "all checks green (autofix)");
    }

    #[tokio::test]
    async fn test_silent_pass_uses_default_message() {
        let temp = TempDir::new().unwrap();
        let gate = checker(&temp, "exit 0");

        let outcome = gate.check(GateMode::Check).await;
        assert!(outcome.passed());
        assert_eq!(outcome.message, "Gate passed.");
    }

    #[tokio::test]
    async fn test_failure_prefers_stderr() {
        let temp = TempDir::new().unwrap();
        let gate = checker(&temp, "echo out\necho 'clippy: 2 warnings' >&2\nexit 1");

        let outcome = gate.check(GateMode::Autofix).await;
        assert_eq!(outcome.verdict, GateVerdict::Failed);
        assert_eq!(outcome.message, "clippy: 2 warnings");

        let err = outcome.into_error().unwrap();
        assert_eq!(err.to_string(), "Workflow gate failed: clippy: 2 warnings");
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_stdout_then_exit_code() {
        let temp = TempDir::new().unwrap();
        let gate = checker(&temp, "echo 'tests failed'\nexit 2");
        let outcome = gate.check(GateMode::Autofix).await;
        assert_eq!(outcome.message, "tests failed");

        let temp = TempDir::new().unwrap();
        let gate = checker(&temp, "exit 3");
        let outcome = gate.check(GateMode::Autofix).await;
        assert_eq!(outcome.verdict, GateVerdict::Failed);
        assert_eq!(outcome.message, "Exit code 3");
    }

    #[tokio::test]
    async fn test_runs_from_working_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("marker.txt"), "x").unwrap();
        let gate = checker(&temp, "test -f marker.txt");

        assert!(gate.check(GateMode::Check).await.passed());
    }

    #[tokio::test]
    async fn test_timeout_fails_and_returns_promptly() {
        let temp = TempDir::new().unwrap();
        let gate = checker(&temp, "exec sleep 5").with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let outcome = gate.check(GateMode::Autofix).await;
        assert_eq!(outcome.verdict, GateVerdict::TimedOut);
        assert!(outcome.message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(
            outcome.into_error(),
            Some(WorkflowError::GateTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_error_is_reported_not_raised() {
        let temp = TempDir::new().unwrap();
        let gate = checker(&temp, "exit 0").with_interpreter("/nonexistent/interpreter");

        let outcome = gate.check(GateMode::Autofix).await;
        assert_eq!(outcome.verdict, GateVerdict::Error);
        assert!(!outcome.passed());
        assert!(outcome.message.contains("Failed to run"));
    }
}
