//! Failure documents.
//!
//! Every pipeline failure gets its own markdown file under the error log
//! directory. Existing files are never overwritten.
//!
//! The document carries the error's `source()` chain and a backtrace: the
//! one captured with the error when there is one, otherwise a trace of the
//! worker at the point the failure was recorded.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::PipelineError;

/// Writes one markdown document per failed run.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    dir: PathBuf,
}

impl ErrorLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the documents are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records `error` for `workflow_id` and returns the path written.
    pub fn record(&self, workflow_id: &str, error: &PipelineError) -> io::Result<PathBuf> {
        self.record_at(workflow_id, error, Utc::now())
    }

    fn record_at(
        &self,
        workflow_id: &str,
        error: &PipelineError,
        now: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let here;
        let trace = match error.backtrace() {
            Some(trace) if trace.status() == BacktraceStatus::Captured => trace,
            _ => {
                here = Backtrace::force_capture();
                &here
            }
        };
        let body = render(workflow_id, error, Some(trace), now);
        let stem = format!("{}-{}-error", now.format("%Y%m%d-%H%M%S"), workflow_id);

        let mut attempt = 1;
        loop {
            let name = if attempt == 1 {
                format!("{}.md", stem)
            } else {
                format!("{}-{}.md", stem, attempt)
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

fn render(
    workflow_id: &str,
    error: &PipelineError,
    trace: Option<&Backtrace>,
    now: DateTime<Utc>,
) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# Workflow error: {}\n\n", workflow_id));
    doc.push_str(&format!("- **Workflow ID**: {}\n", workflow_id));
    doc.push_str(&format!("- **Time**: {}\n", now.to_rfc3339()));
    doc.push_str(&format!("- **Kind**: {}\n\n", error.kind()));
    doc.push_str("## Message\n\n");
    doc.push_str(&format!("{}\n", error));

    let mut source = error.source();
    if source.is_some() {
        doc.push_str("\n## Caused by\n\n");
    }
    let mut depth = 1;
    while let Some(cause) = source {
        doc.push_str(&format!("{}. {}\n", depth, cause));
        source = cause.source();
        depth += 1;
    }

    if let Some(trace) = trace.filter(|t| t.status() == BacktraceStatus::Captured) {
        doc.push_str("\n## Backtrace\n\n```text\n");
        doc.push_str(trace.to_string().trim_end());
        doc.push_str("\n```\n");
    }
    doc
}
