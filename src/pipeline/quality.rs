//! Per-stage quality thresholds.
//!
//! Each agent's self-assessed score (0-100) is compared against the minimum
//! for its stage. The evaluation is recorded alongside the score; it does not
//! change the run status on its own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default minimum scores by stage name.
const DEFAULT_THRESHOLDS: &[(&str, f64)] = &[
    ("project-planner", 85.0),
    ("code-architect", 85.0),
    ("implementation-agent", 80.0),
    ("code-reviewer", 85.0),
    ("testing-agent", 80.0),
    ("documentation-agent", 80.0),
    ("git-agent", 90.0),
    ("cleanup-agent", 85.0),
    ("retrospective-agent", 75.0),
];

/// Result of checking one stage score against its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageGateResult {
    pub score: f64,
    /// `None` when no gate is defined for the stage.
    pub threshold: Option<f64>,
    pub passed: bool,
}

/// Stage name to minimum score.
#[derive(Debug, Clone)]
pub struct QualityGates {
    thresholds: HashMap<String, f64>,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_THRESHOLDS
                .iter()
                .map(|(stage, min)| (stage.to_string(), *min))
                .collect(),
        }
    }
}

impl QualityGates {
    /// Creates an empty set of gates; every stage passes.
    pub fn empty() -> Self {
        Self {
            thresholds: HashMap::new(),
        }
    }

    /// Sets or replaces the threshold for a stage.
    pub fn with_threshold(mut self, stage: impl Into<String>, min_score: f64) -> Self {
        self.thresholds.insert(stage.into(), min_score);
        self
    }

    /// Returns the threshold for a stage, if any.
    pub fn threshold(&self, stage: &str) -> Option<f64> {
        self.thresholds.get(stage).copied()
    }

    /// Evaluates a stage score.
    pub fn evaluate(&self, stage: &str, score: f64) -> StageGateResult {
        let threshold = self.threshold(stage);
        StageGateResult {
            score,
            threshold,
            passed: threshold.map_or(true, |min| score >= min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let gates = QualityGates::default();
        assert_eq!(gates.threshold("git-agent"), Some(90.0));
        assert_eq!(gates.threshold("retrospective-agent"), Some(75.0));
        assert_eq!(gates.threshold("unknown-agent"), None);
    }

    #[test]
    fn test_evaluate_pass_and_fail() {
        let gates = QualityGates::default();

        let result = gates.evaluate("code-reviewer", 85.0);
        assert!(result.passed);
        assert_eq!(result.threshold, Some(85.0));

        let result = gates.evaluate("code-reviewer", 84.9);
        assert!(!result.passed);
    }

    #[test]
    fn test_unknown_stage_passes() {
        let result = QualityGates::empty().evaluate("anything", 0.0);
        assert!(result.passed);
        assert!(result.threshold.is_none());
    }

    #[test]
    fn test_override_threshold() {
        let gates = QualityGates::default().with_threshold("project-planner", 95.0);
        assert!(!gates.evaluate("project-planner", 90.0).passed);
    }
}
