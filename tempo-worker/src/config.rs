//! Configuration resolution for tempo-worker
//!
//! Priority: command line → environment → TOML file → compiled defaults.
//! Command line and environment are merged by clap in `main.rs` and arrive
//! here as [`ConfigOverrides`]; the TOML file supplies [`WorkerSettings`].

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tempo_common::config::{find_config_file, read_toml_file, resolve_data_dir};
use tempo_common::{time, Error, Result};
use tracing::{debug, info};

use crate::services::EngineSettings;

/// Environment variable naming the data folder
pub const DATA_DIR_ENV: &str = "TEMPO_DATA_DIR";
/// Module name used for the default config file (`worker.toml`)
pub const CONFIG_MODULE: &str = "worker";

/// Tunables read from the TOML config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    pub database: Option<PathBuf>,
    pub storage_root: Option<PathBuf>,
    /// Parent folder for per-job temporary directories (system temp if unset)
    pub work_dir: Option<PathBuf>,
    /// Sleep between polls when both queues are empty
    pub poll_interval_ms: u64,
    /// Sleep after a claim fails because the store is unavailable
    pub claim_backoff_ms: u64,
    pub analysis_timeout_secs: u64,
    pub render_timeout_secs: u64,
    /// Running jobs older than this are failed as abandoned; 0 disables
    pub stale_after_secs: u64,
    /// Retry budget for result write-backs that hit a locked database
    pub lock_retry_ms: u64,
    pub ffmpeg_bin: String,
    pub aubio_bin: String,
    /// Analysis excerpt start, seconds into the track
    pub excerpt_offset_secs: f64,
    /// Analysis excerpt length
    pub excerpt_secs: f64,
    pub sample_rate: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            database: None,
            storage_root: None,
            work_dir: None,
            poll_interval_ms: 2000,
            claim_backoff_ms: 2000,
            analysis_timeout_secs: 300,
            render_timeout_secs: 600,
            stale_after_secs: 1800,
            lock_retry_ms: 60_000,
            ffmpeg_bin: "ffmpeg".to_string(),
            aubio_bin: "aubio".to_string(),
            excerpt_offset_secs: 45.0,
            excerpt_secs: 90.0,
            sample_rate: 44100,
        }
    }
}

impl WorkerSettings {
    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be greater than 0".to_string()));
        }
        if self.analysis_timeout_secs == 0 || self.render_timeout_secs == 0 {
            return Err(Error::Config("job timeouts must be greater than 0".to_string()));
        }
        if self.stale_after_secs != 0 && self.stale_after_secs <= self.render_timeout_secs {
            return Err(Error::Config(format!(
                "stale_after_secs ({}) must exceed render_timeout_secs ({}) or be 0",
                self.stale_after_secs, self.render_timeout_secs
            )));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be greater than 0".to_string()));
        }
        if !(self.excerpt_secs > 0.0) || !(self.excerpt_offset_secs >= 0.0) {
            return Err(Error::Config(
                "excerpt_secs must be positive and excerpt_offset_secs non-negative".to_string(),
            ));
        }
        if self.ffmpeg_bin.trim().is_empty() || self.aubio_bin.trim().is_empty() {
            return Err(Error::Config("tool binary names must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        time::millis_to_duration(self.poll_interval_ms)
    }

    pub fn claim_backoff(&self) -> Duration {
        time::millis_to_duration(self.claim_backoff_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn lock_retry(&self) -> Duration {
        time::millis_to_duration(self.lock_retry_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }

    /// Tool and audio parameters handed to the engines
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            aubio_bin: self.aubio_bin.clone(),
            sample_rate: self.sample_rate,
            excerpt_offset_secs: self.excerpt_offset_secs,
            excerpt_secs: self.excerpt_secs,
            work_dir: self.work_dir.clone(),
        }
    }
}

/// Values from the command line or environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub storage_root: Option<PathBuf>,
}

/// Fully resolved worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database: PathBuf,
    pub storage_root: PathBuf,
    pub settings: WorkerSettings,
}

/// Resolve the worker configuration
///
/// An explicitly named config file must exist; the default location is
/// optional and silently skipped when absent.
pub fn load_config(overrides: ConfigOverrides) -> Result<WorkerConfig> {
    let settings = match overrides.config_file.as_deref() {
        Some(path) => {
            info!("Loading config file: {}", path.display());
            read_toml_file::<WorkerSettings>(path)?
        }
        None => match find_config_file(CONFIG_MODULE) {
            Some(path) => {
                info!("Loading config file: {}", path.display());
                read_toml_file::<WorkerSettings>(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                WorkerSettings::default()
            }
        },
    };

    settings.validate()?;

    let data_dir = resolve_data_dir(overrides.data_dir.as_deref(), DATA_DIR_ENV);

    let database = overrides
        .database
        .or_else(|| settings.database.clone())
        .unwrap_or_else(|| data_dir.join("tempo.db"));

    let storage_root = overrides
        .storage_root
        .or_else(|| settings.storage_root.clone())
        .unwrap_or_else(|| data_dir.join("objects"));

    Ok(WorkerConfig {
        database,
        storage_root,
        settings,
    })
}
