//! Job row models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Lowest target tempo accepted for a render
pub const MIN_TARGET_BPM: f64 = 40.0;
/// Highest target tempo accepted for a render
pub const MAX_TARGET_BPM: f64 = 260.0;
/// Stored error messages are cut to this many characters
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Job lifecycle status, shared by analysis and render jobs
///
/// Only `Queued -> Running -> {Done, Failed}` is reachable from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    /// Done and failed rows are never modified by the worker
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Internal(format!("Unknown job status: {}", other))),
        }
    }
}

/// Track row (owned by the request layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub original_object_key: String,
    pub created_at: DateTime<Utc>,
}

/// Tempo analysis job for one track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub track_id: String,
    pub status: JobStatus,
    pub bpm: Option<f64>,
    pub confidence: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Time-stretch render job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: String,
    pub track_id: String,
    pub target_bpm: f64,
    pub tempo_ratio: Option<f64>,
    pub preserve_pitch: bool,
    pub status: JobStatus,
    pub output_key: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Analysis job handed to exactly one worker by a claim
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedAnalysisJob {
    pub id: String,
    pub track_id: String,
}

/// Render job handed to exactly one worker by a claim
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedRenderJob {
    pub id: String,
    pub track_id: String,
    pub target_bpm: f64,
    pub preserve_pitch: bool,
}

/// Cut an error message to [`MAX_ERROR_MESSAGE_CHARS`] characters
///
/// Counts characters, not bytes, so multi-byte tool output never splits a code point.
pub fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}
