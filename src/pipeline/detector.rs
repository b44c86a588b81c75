//! Request classification.
//!
//! Looks at the wording of an incoming request and decides whether it reads
//! like a complex multi-stage coding task or a small tweak. The result is
//! recorded on the run and echoed back to the caller; it never shortens the
//! stage sequence.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Keywords that suggest a task worth the full pipeline.
const COMPLEX_KEYWORDS: &[&str] = &[
    "build",
    "create",
    "implement",
    "develop",
    "refactor",
    "redesign",
    "migrate",
    "architect",
    "new feature",
    "add feature",
    "api",
    "endpoint",
    "database",
    "schema",
    "authentication",
    "authorization",
    "security",
    "integration",
    "comprehensive",
    "complete",
    "full",
    "production",
];

/// Keywords that suggest a small task. These take precedence.
const SIMPLE_KEYWORDS: &[&str] = &[
    "typo", "rename", "comment", "tweak", "explain", "what is", "how does", "show", "status",
    "minor", "small", "quick", "single",
];

/// Weights used for the complexity score.
const COMPLEXITY_WEIGHTS: &[(&str, u32)] = &[
    ("new feature", 40),
    ("add feature", 40),
    ("build", 35),
    ("create", 30),
    ("implement", 30),
    ("develop", 30),
    ("architect", 30),
    ("security", 30),
    ("authentication", 30),
    ("database", 25),
    ("schema", 25),
    ("api", 20),
    ("endpoint", 20),
    ("refactor", 15),
    ("test", 10),
];

/// Score at or above which a request is recommended for the full pipeline.
pub const FULL_PIPELINE_THRESHOLD: u32 = 50;

/// Classification of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Reads like a multi-file feature or redesign.
    Complex,
    /// Reads like a small change or a question.
    Simple,
    /// No keyword matched.
    Unknown,
    /// Caller asked for the full pipeline; detection was skipped.
    Forced,
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowType::Complex => write!(f, "complex"),
            WorkflowType::Simple => write!(f, "simple"),
            WorkflowType::Unknown => write!(f, "unknown"),
            WorkflowType::Forced => write!(f, "forced"),
        }
    }
}

/// Result of classifying a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub workflow_type: WorkflowType,
    pub matched_keywords: Vec<String>,
    pub complexity_score: u32,
    pub suggestion: String,
}

impl Detection {
    /// Returns true if the complexity score recommends the full pipeline.
    pub fn recommends_full_pipeline(&self) -> bool {
        self.workflow_type == WorkflowType::Forced
            || self.complexity_score >= FULL_PIPELINE_THRESHOLD
    }
}

/// Keyword-based request classifier.
pub struct RequestClassifier {
    complex: Vec<(&'static str, Regex)>,
    simple: Vec<(&'static str, Regex)>,
    weighted: Vec<(Regex, u32)>,
}

impl Default for RequestClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestClassifier {
    /// Builds the classifier with the built-in keyword tables.
    pub fn new() -> Self {
        Self {
            complex: compile(COMPLEX_KEYWORDS),
            simple: compile(SIMPLE_KEYWORDS),
            weighted: COMPLEXITY_WEIGHTS
                .iter()
                .filter_map(|(kw, weight)| keyword_regex(kw).map(|re| (re, *weight)))
                .collect(),
        }
    }

    /// Classifies a request. `force_full` skips keyword detection.
    pub fn detect(&self, request: &str, force_full: bool) -> Detection {
        let complexity_score = self.complexity_score(request);

        if force_full {
            return Detection {
                workflow_type: WorkflowType::Forced,
                matched_keywords: Vec::new(),
                complexity_score,
                suggestion: "Full pipeline requested; detection skipped.".to_string(),
            };
        }

        let simple_matches = matches(&self.simple, request);
        if !simple_matches.is_empty() {
            return Detection {
                workflow_type: WorkflowType::Simple,
                matched_keywords: simple_matches,
                complexity_score,
                suggestion: "This appears to be a simple task.".to_string(),
            };
        }

        let complex_matches = matches(&self.complex, request);
        if !complex_matches.is_empty() {
            return Detection {
                workflow_type: WorkflowType::Complex,
                matched_keywords: complex_matches,
                complexity_score,
                suggestion: "This appears to be a complex coding task.".to_string(),
            };
        }

        Detection {
            workflow_type: WorkflowType::Unknown,
            matched_keywords: Vec::new(),
            complexity_score,
            suggestion: "Unable to determine task complexity.".to_string(),
        }
    }

    /// Sums the weights of every weighted keyword present in the request.
    pub fn complexity_score(&self, request: &str) -> u32 {
        self.weighted
            .iter()
            .filter(|(re, _)| re.is_match(request))
            .map(|(_, weight)| weight)
            .sum()
    }
}

/// Case-insensitive match anchored at a word start, so "build" also matches "building".
fn keyword_regex(keyword: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b{}", regex::escape(keyword))).ok()
}

fn compile(keywords: &[&'static str]) -> Vec<(&'static str, Regex)> {
    keywords
        .iter()
        .filter_map(|kw| keyword_regex(kw).map(|re| (*kw, re)))
        .collect()
}

fn matches(table: &[(&'static str, Regex)], request: &str) -> Vec<String> {
    table
        .iter()
        .filter(|(_, re)| re.is_match(request))
        .map(|(kw, _)| kw.to_string())
        .collect()
}
