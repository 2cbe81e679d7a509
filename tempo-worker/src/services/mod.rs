//! Job engines
//!
//! **Tempo estimation** ([`tempo_estimator`]): normalize an excerpt, run two
//! independent estimators, resolve octave ambiguity.
//!
//! **Render** ([`renderer`]): normalize, apply a bounded time-stretch chain,
//! encode and publish the artifact.
//!
//! Engines never touch job rows; they return results for the scheduler to
//! persist.

pub mod renderer;
pub mod tempo_estimator;

pub use renderer::{render_track, RenderOutcome, RenderRequest};
pub use tempo_estimator::{analyze_track, TempoEstimate};

use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use crate::error::JobResult;
use crate::storage::ObjectStore;
use crate::tools::ToolRunner;

/// Tool binaries and audio parameters shared by both engines
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub ffmpeg_bin: String,
    pub aubio_bin: String,
    pub sample_rate: u32,
    pub excerpt_offset_secs: f64,
    pub excerpt_secs: f64,
    pub work_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            aubio_bin: "aubio".to_string(),
            sample_rate: 44100,
            excerpt_offset_secs: 45.0,
            excerpt_secs: 90.0,
            work_dir: None,
        }
    }
}

/// Collaborators available to one job execution
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub tools: &'a dyn ToolRunner,
    pub storage: &'a dyn ObjectStore,
    pub settings: &'a EngineSettings,
    /// Upper bound for any single tool invocation
    pub tool_timeout: Duration,
}

impl JobContext<'_> {
    /// Private scratch directory for one job, removed when dropped
    pub(crate) fn scratch_dir(&self, prefix: &str) -> JobResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match &self.settings.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Download `key` into `dir`, keeping its extension for format probing
    pub(crate) async fn fetch_source(&self, key: &str, dir: &Path) -> JobResult<PathBuf> {
        let file_name = match Path::new(key).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("source.{}", ext),
            None => "source".to_string(),
        };
        let local = dir.join(file_name);
        self.storage.download(key, &local).await?;
        Ok(local)
    }

    /// Transcode `src` to mono WAV at the configured sample rate
    ///
    /// `excerpt` is `(offset, length)` in seconds.
    pub(crate) async fn normalize(&self, src: &Path, dest: &Path, excerpt: Option<(f64, f64)>) -> JobResult<()> {
        let args = normalize_args(src, dest, self.settings.sample_rate, excerpt);
        self.tools
            .run_tool(&self.settings.ffmpeg_bin, &args, self.tool_timeout)
            .await?;
        Ok(())
    }
}

/// Transcoder arguments for mono resampling, optionally cutting an excerpt
pub fn normalize_args(src: &Path, dest: &Path, sample_rate: u32, excerpt: Option<(f64, f64)>) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    if let Some((offset, length)) = excerpt {
        args.extend(["-ss".to_string(), offset.to_string(), "-t".to_string(), length.to_string()]);
    }
    args.extend([
        "-i".to_string(),
        src.display().to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        dest.display().to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_args_with_excerpt() {
        let args = normalize_args(Path::new("/in.mp3"), Path::new("/tmp/w.wav"), 44100, Some((45.0, 90.0)));
        assert_eq!(
            args,
            vec!["-y", "-ss", "45", "-t", "90", "-i", "/in.mp3", "-ac", "1", "-ar", "44100", "/tmp/w.wav"]
        );
    }

    #[test]
    fn test_normalize_args_full_track() {
        let args = normalize_args(Path::new("/in.mp3"), Path::new("/tmp/w.wav"), 22050, None);
        assert_eq!(args, vec!["-y", "-i", "/in.mp3", "-ac", "1", "-ar", "22050", "/tmp/w.wav"]);
    }
}
