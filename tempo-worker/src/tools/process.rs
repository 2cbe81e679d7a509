//! Subprocess-backed tool runner

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use super::{ToolOutput, ToolRunner};
use crate::error::{JobError, JobResult};

/// Longest stderr/stdout excerpt kept in a failure message
const DIAGNOSTIC_CHARS: usize = 2000;

/// Runs tools as child processes
///
/// Children are spawned with `kill_on_drop`, so dropping the future (tool
/// timeout, job timeout) kills the process instead of leaking it.
#[derive(Debug, Clone, Default)]
pub struct ProcessToolRunner;

impl ProcessToolRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run_tool(&self, name: &str, args: &[String], timeout: Duration) -> JobResult<ToolOutput> {
        debug!(tool = name, ?args, timeout_secs = timeout.as_secs(), "Running tool");
        let started = Instant::now();

        let child = Command::new(name)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => JobError::tool(name, "binary not found in PATH"),
                _ => JobError::tool(name, format!("failed to start: {}", e)),
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| JobError::tool(name, format!("failed to collect output: {}", e)))?,
            Err(_) => return Err(JobError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        debug!(
            tool = name,
            status = ?output.status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool finished"
        );

        if !output.status.success() {
            let diagnostics = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(JobError::tool(
                name,
                format!("{} {}: {}\n{}", name, args.join(" "), output.status, tail(diagnostics)),
            ));
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

/// Keep the end of long tool output; errors are usually printed last
fn tail(text: &str) -> &str {
    let text = text.trim();
    let count = text.chars().count();
    if count <= DIAGNOSTIC_CHARS {
        return text;
    }
    match text.char_indices().nth(count - DIAGNOSTIC_CHARS) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
