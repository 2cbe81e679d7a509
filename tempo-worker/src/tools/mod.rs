//! External tool invocation
//!
//! Engines never spawn processes themselves; they call a [`ToolRunner`].
//! Production uses [`ProcessToolRunner`]; tests substitute a scripted double.

mod process;

pub use process::ProcessToolRunner;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::JobResult;

/// Captured output of a successful tool run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Capability to run an external command-line tool
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `name` with `args`, failing if it has not exited within `timeout`
    ///
    /// # Errors
    /// - `JobError::ToolFailure` if the tool cannot start or exits non-zero
    /// - `JobError::Timeout` if the deadline passes; the process is killed
    async fn run_tool(&self, name: &str, args: &[String], timeout: Duration) -> JobResult<ToolOutput>;
}
