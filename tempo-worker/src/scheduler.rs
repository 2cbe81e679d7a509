//! Worker scheduler
//!
//! One sequential poll loop per process. Each cycle:
//!
//! ```text
//! claim analysis ──found──▶ run analysis ──▶ write back ──▶ next cycle
//!      │ none
//!      ▼
//! claim render ────found──▶ run render ────▶ write back ──▶ next cycle
//!      │ none
//!      ▼
//!    idle: sleep poll_interval
//! ```
//!
//! Analysis always drains before render. Every job runs under its own
//! timeout; a job error becomes a stored `failed` row and the loop goes on.
//! Only claim errors (store unavailable) pause the loop, with a fixed backoff.
//! Write-backs that hit a locked database are retried for `lock_retry`
//! before the result is given up.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempo_common::db::{truncate_error_message, ClaimedAnalysisJob, ClaimedRenderJob};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::WorkerSettings;
use crate::db;
use crate::error::{ClaimError, JobError, JobResult};
use crate::services::renderer::detected_bpm;
use crate::services::{
    analyze_track, render_track, EngineSettings, JobContext, RenderOutcome, RenderRequest,
    TempoEstimate,
};
use crate::storage::ObjectStore;
use crate::tools::ToolRunner;
use crate::utils::retry_on_lock;

/// Loop timing
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub claim_backoff: Duration,
    pub analysis_timeout: Duration,
    pub render_timeout: Duration,
    /// Running jobs older than this are failed as abandoned
    pub stale_after: Option<Duration>,
    /// How long a write-back keeps retrying while the database is locked
    pub lock_retry: Duration,
}

impl From<&WorkerSettings> for SchedulerSettings {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            claim_backoff: settings.claim_backoff(),
            analysis_timeout: settings.analysis_timeout(),
            render_timeout: settings.render_timeout(),
            stale_after: settings.stale_after(),
            lock_retry: settings.lock_retry(),
        }
    }
}

/// How a claimed job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Result stored, row is `done`
    Done,
    /// Row is `failed` with this (truncated) message
    Failed(String),
    /// Row left `running` before write-back (reclaimed as stale); result dropped
    Discarded,
    /// Neither the result nor the failure could be stored; row is still
    /// `running` until stale reclaim fails it
    Unrecorded(String),
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Analysis { job_id: String, outcome: JobOutcome },
    Render { job_id: String, outcome: JobOutcome },
    Idle,
    ClaimFailed,
}

pub struct Scheduler {
    pool: SqlitePool,
    tools: Arc<dyn ToolRunner>,
    storage: Arc<dyn ObjectStore>,
    engine: EngineSettings,
    settings: SchedulerSettings,
    last_reclaim: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        tools: Arc<dyn ToolRunner>,
        storage: Arc<dyn ObjectStore>,
        engine: EngineSettings,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            pool,
            tools,
            storage,
            engine,
            settings,
            last_reclaim: None,
        }
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// Shutdown is observed between jobs and while sleeping; a running job
    /// is allowed to finish (bounded by its timeout).
    pub async fn run_until(&mut self, shutdown: CancellationToken) {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            analysis_timeout_secs = self.settings.analysis_timeout.as_secs(),
            render_timeout_secs = self.settings.render_timeout.as_secs(),
            "Scheduler started"
        );

        while !shutdown.is_cancelled() {
            let pause = match self.tick().await {
                Tick::Idle => Some(self.settings.poll_interval),
                Tick::ClaimFailed => Some(self.settings.claim_backoff),
                Tick::Analysis { .. } | Tick::Render { .. } => None,
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run exactly one poll cycle
    pub async fn tick(&mut self) -> Tick {
        self.reclaim_if_due().await;

        match self.claim_analysis().await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                let outcome = self.process_analysis(job).await;
                return Tick::Analysis { job_id, outcome };
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Analysis claim failed, backing off");
                return Tick::ClaimFailed;
            }
        }

        match self.claim_render().await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                let outcome = self.process_render(job).await;
                Tick::Render { job_id, outcome }
            }
            Ok(None) => Tick::Idle,
            Err(e) => {
                warn!(error = %e, "Render claim failed, backing off");
                Tick::ClaimFailed
            }
        }
    }

    async fn claim_analysis(&self) -> Result<Option<ClaimedAnalysisJob>, ClaimError> {
        Ok(db::claim_next_analysis_job(&self.pool).await?)
    }

    async fn claim_render(&self) -> Result<Option<ClaimedRenderJob>, ClaimError> {
        Ok(db::claim_next_render_job(&self.pool).await?)
    }

    async fn reclaim_if_due(&mut self) {
        let Some(stale_after) = self.settings.stale_after else {
            return;
        };
        if let Some(last) = self.last_reclaim {
            if last.elapsed() < stale_after {
                return;
            }
        }
        self.last_reclaim = Some(Instant::now());

        match db::reclaim_stale_jobs(&self.pool, stale_after).await {
            Ok(report) if report.total() > 0 => warn!(
                analysis = report.analysis,
                render = report.render,
                stale_after_secs = stale_after.as_secs(),
                "Failed abandoned running jobs"
            ),
            Ok(_) => debug!("No abandoned running jobs"),
            Err(e) => warn!(error = %e, "Stale job reclaim failed"),
        }
    }

    fn context(&self, tool_timeout: Duration) -> JobContext<'_> {
        JobContext {
            tools: self.tools.as_ref(),
            storage: self.storage.as_ref(),
            settings: &self.engine,
            tool_timeout,
        }
    }

    async fn process_analysis(&self, job: ClaimedAnalysisJob) -> JobOutcome {
        let span = info_span!("analysis_job", job_id = %job.id, track_id = %job.track_id);
        async {
            info!("Claimed analysis job");
            let started = Instant::now();
            let budget = self.settings.analysis_timeout;

            let result = match tokio::time::timeout(budget, self.execute_analysis(&job, budget)).await {
                Ok(result) => result,
                Err(_) => Err(JobError::Timeout(budget)),
            };

            let outcome = self.finish_analysis(&job, result).await;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, ?outcome, "Analysis job finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute_analysis(&self, job: &ClaimedAnalysisJob, budget: Duration) -> JobResult<TempoEstimate> {
        let source_key = db::source_key(&self.pool, &job.track_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("track {}", job.track_id)))?;

        analyze_track(&self.context(budget), &source_key).await
    }

    async fn finish_analysis(&self, job: &ClaimedAnalysisJob, result: JobResult<TempoEstimate>) -> JobOutcome {
        match result {
            Ok(estimate) => {
                let stored = retry_on_lock("mark_analysis_done", self.settings.lock_retry, || {
                    db::mark_analysis_done(&self.pool, &job.id, estimate.bpm, estimate.confidence)
                })
                .await;
                match stored {
                    Ok(true) => {
                        info!(bpm = estimate.bpm, confidence = estimate.confidence, "Analysis done");
                        JobOutcome::Done
                    }
                    Ok(false) => {
                        warn!("Analysis job no longer running, result discarded");
                        JobOutcome::Discarded
                    }
                    Err(e) => {
                        let message = format!("failed to store analysis result: {}", e);
                        self.fail_analysis(job, &message).await
                    }
                }
            }
            Err(e) => self.fail_analysis(job, &e.to_string()).await,
        }
    }

    async fn fail_analysis(&self, job: &ClaimedAnalysisJob, message: &str) -> JobOutcome {
        error!(error = %message, "Analysis failed");
        let stored = retry_on_lock("mark_analysis_failed", self.settings.lock_retry, || {
            db::mark_analysis_failed(&self.pool, &job.id, message)
        })
        .await;
        match stored {
            Ok(true) => JobOutcome::Failed(truncate_error_message(message)),
            Ok(false) => {
                warn!("Analysis job no longer running, failure not recorded");
                JobOutcome::Discarded
            }
            Err(e) => {
                error!(error = %e, "Could not record analysis failure, row left running");
                JobOutcome::Unrecorded(truncate_error_message(&format!("{} (not stored: {})", message, e)))
            }
        }
    }

    async fn process_render(&self, job: ClaimedRenderJob) -> JobOutcome {
        let span = info_span!(
            "render_job",
            job_id = %job.id,
            track_id = %job.track_id,
            target_bpm = job.target_bpm
        );
        async {
            info!(preserve_pitch = job.preserve_pitch, "Claimed render job");
            let started = Instant::now();
            let budget = self.settings.render_timeout;

            let result = match tokio::time::timeout(budget, self.execute_render(&job, budget)).await {
                Ok(result) => result,
                Err(_) => Err(JobError::Timeout(budget)),
            };

            let outcome = self.finish_render(&job, result).await;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, ?outcome, "Render job finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute_render(&self, job: &ClaimedRenderJob, budget: Duration) -> JobResult<RenderOutcome> {
        let source_key = db::source_key(&self.pool, &job.track_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("track {}", job.track_id)))?;

        let analysis = db::get_analysis_for_track(&self.pool, &job.track_id).await?;
        let detected = detected_bpm(analysis.as_ref())?;

        let request = RenderRequest {
            source_key: &source_key,
            detected_bpm: detected,
            target_bpm: job.target_bpm,
            preserve_pitch: job.preserve_pitch,
        };
        render_track(&self.context(budget), request).await
    }

    async fn finish_render(&self, job: &ClaimedRenderJob, result: JobResult<RenderOutcome>) -> JobOutcome {
        match result {
            Ok(render) => {
                let stored = retry_on_lock("mark_render_done", self.settings.lock_retry, || {
                    db::mark_render_done(&self.pool, &job.id, render.tempo_ratio, &render.output_key)
                })
                .await;
                match stored {
                    Ok(true) => {
                        info!(
                            tempo_ratio = render.tempo_ratio,
                            output_key = %render.output_key,
                            "Render done"
                        );
                        JobOutcome::Done
                    }
                    Ok(false) => {
                        warn!(output_key = %render.output_key, "Render job no longer running, result discarded");
                        JobOutcome::Discarded
                    }
                    Err(e) => {
                        let message = format!("failed to store render result: {}", e);
                        self.fail_render(job, &message).await
                    }
                }
            }
            Err(e) => self.fail_render(job, &e.to_string()).await,
        }
    }

    async fn fail_render(&self, job: &ClaimedRenderJob, message: &str) -> JobOutcome {
        error!(error = %message, "Render failed");
        let stored = retry_on_lock("mark_render_failed", self.settings.lock_retry, || {
            db::mark_render_failed(&self.pool, &job.id, message)
        })
        .await;
        match stored {
            Ok(true) => JobOutcome::Failed(truncate_error_message(message)),
            Ok(false) => {
                warn!("Render job no longer running, failure not recorded");
                JobOutcome::Discarded
            }
            Err(e) => {
                error!(error = %e, "Could not record render failure, row left running");
                JobOutcome::Unrecorded(truncate_error_message(&format!("{} (not stored: {})", message, e)))
            }
        }
    }
}
