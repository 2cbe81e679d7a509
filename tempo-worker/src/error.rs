//! Error types for tempo-worker
//!
//! Every job-level failure is a [`JobError`]. The scheduler stores its
//! display text (truncated) as the job's `error_message`, so variants carry
//! the diagnostic text operators need.

use std::time::Duration;
use thiserror::Error;

/// Job execution error
#[derive(Debug, Error)]
pub enum JobError {
    /// Referenced track, source media or prerequisite analysis missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Estimators found too little rhythmic structure
    #[error(
        "Not enough beat events detected to estimate BPM ({beats} beats, {intervals} usable intervals)"
    )]
    InsufficientBeats { beats: usize, intervals: usize },

    /// Tempo ratio is zero, negative or not a number
    #[error("Invalid tempo ratio: {0}")]
    InvalidRatio(f64),

    /// Track analysis is not done or has no usable BPM
    #[error("Analysis not ready (status={status}, bpm={bpm:?})")]
    AnalysisNotReady { status: String, bpm: Option<f64> },

    /// External tool exited non-zero, could not start, or printed garbage
    #[error("{tool} failed: {detail}")]
    ToolFailure { tool: String, detail: String },

    /// Job or tool exceeded its execution budget
    #[error("Timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Object storage read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Local file system error (temp dirs, output files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Job store error during lookup
    #[error(transparent)]
    Store(#[from] tempo_common::Error),
}

impl JobError {
    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        JobError::ToolFailure {
            tool: tool.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for job execution
pub type JobResult<T> = Result<T, JobError>;

/// Store unavailable or transaction failure while claiming
///
/// Never a job failure: the scheduler backs off and polls again.
#[derive(Debug, Error)]
#[error("Claim failed: {0}")]
pub struct ClaimError(#[from] pub tempo_common::Error);
