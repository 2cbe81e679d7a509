//! Scripted tool runner
//!
//! Stands in for ffmpeg and aubio: transcoder calls check their input and
//! write a small output file, estimator calls print canned text.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempo_worker::tools::{ToolOutput, ToolRunner};
use tempo_worker::{JobError, JobResult};

/// Which invocation a call represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStep {
    Normalize,
    Stretch,
    Tempo,
    Beat,
}

impl ToolStep {
    fn classify(name: &str, args: &[String]) -> Option<Self> {
        match name {
            "ffmpeg" if args.iter().any(|a| a == "-filter:a") => Some(ToolStep::Stretch),
            "ffmpeg" => Some(ToolStep::Normalize),
            "aubio" => match args.first().map(String::as_str) {
                Some("tempo") => Some(ToolStep::Tempo),
                Some("beat") => Some(ToolStep::Beat),
                _ => None,
            },
            _ => None,
        }
    }
}

pub struct ScriptedTools {
    tempo_output: String,
    beat_output: String,
    failure: Option<(ToolStep, String)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedTools {
    /// Tools reporting `tempo` from the global estimator and `beats` as events
    pub fn new(tempo: &str, beats: &[f64]) -> Self {
        let beat_output = beats
            .iter()
            .map(|b| format!("{:.6}\n", b))
            .collect::<String>();
        Self {
            tempo_output: tempo.to_string(),
            beat_output,
            failure: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make `step` exit non-zero with `detail` on stderr
    pub fn failing_at(mut self, step: ToolStep, detail: impl Into<String>) -> Self {
        self.failure = Some((step, detail.into()));
        self
    }

    /// Make every call take `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, step: ToolStep) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(name, args)| ToolStep::classify(name, args) == Some(step))
            .map(|(_, args)| args)
            .collect()
    }
}

#[async_trait]
impl ToolRunner for ScriptedTools {
    async fn run_tool(&self, name: &str, args: &[String], timeout: Duration) -> JobResult<ToolOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.to_vec()));

        if let Some(delay) = self.delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(JobError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }

        let step = ToolStep::classify(name, args)
            .ok_or_else(|| JobError::tool(name, "binary not found in PATH"))?;

        if let Some((failing, detail)) = &self.failure {
            if *failing == step {
                return Err(JobError::tool(name, detail.clone()));
            }
        }

        match step {
            ToolStep::Normalize | ToolStep::Stretch => {
                let input = args
                    .iter()
                    .position(|a| a == "-i")
                    .and_then(|i| args.get(i + 1))
                    .ok_or_else(|| JobError::tool(name, "no input"))?;
                if !Path::new(input).exists() {
                    return Err(JobError::tool(name, format!("{}: No such file or directory", input)));
                }
                let output = args.last().ok_or_else(|| JobError::tool(name, "no output"))?;
                std::fs::write(output, b"RIFF fake audio")?;
                Ok(ToolOutput::default())
            }
            ToolStep::Tempo => Ok(ToolOutput::new(self.tempo_output.clone())),
            ToolStep::Beat => Ok(ToolOutput::new(self.beat_output.clone())),
        }
    }
}

/// `count` evenly spaced beat timestamps, the first one at `interval`
///
/// The beat parser drops non-positive timestamps, so nothing starts at 0.
pub fn regular_beats(count: usize, interval: f64) -> Vec<f64> {
    (1..=count).map(|i| i as f64 * interval).collect()
}
