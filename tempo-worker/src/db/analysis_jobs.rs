//! Analysis job store operations

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tempo_common::db::{truncate_error_message, AnalysisJob, ClaimedAnalysisJob, JobStatus};
use tempo_common::{time, Error, Result};
use uuid::Uuid;

use super::{optional_time_column, status_column, time_column, track_exists};

const ANALYSIS_COLUMNS: &str =
    "id, track_id, status, bpm, confidence, error_message, created_at, started_at, finished_at";

/// Queue tempo analysis for a track; returns the analysis job id
///
/// A track has at most one analysis row. Re-enqueueing a finished (`done` or
/// `failed`) row resets it to `queued` as a fresh attempt. A row that is
/// already `queued` is left alone; a `running` row is a conflict.
pub async fn enqueue_analysis(pool: &SqlitePool, track_id: &str) -> Result<String> {
    if !track_exists(pool, track_id).await? {
        return Err(Error::NotFound(format!("track {}", track_id)));
    }

    sqlx::query(
        r#"
        INSERT INTO analysis_jobs (id, track_id, status, created_at)
        VALUES (?, ?, 'queued', ?)
        ON CONFLICT(track_id) DO UPDATE SET
            status = 'queued',
            bpm = NULL,
            confidence = NULL,
            error_message = NULL,
            created_at = excluded.created_at,
            started_at = NULL,
            finished_at = NULL
        WHERE analysis_jobs.status IN ('done', 'failed')
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(track_id)
    .bind(time::now_db())
    .execute(pool)
    .await?;

    let job = get_analysis_for_track(pool, track_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("analysis row for track {} vanished", track_id)))?;

    if job.status == JobStatus::Running {
        return Err(Error::Conflict(format!(
            "analysis {} for track {} is running",
            job.id, track_id
        )));
    }

    Ok(job.id)
}

/// Claim the oldest queued analysis job and mark it `running`
///
/// Returns `None` when nothing is queued. The outer `status = 'queued'`
/// guard keeps the hand-off exclusive even if the subquery raced another
/// claimer's commit.
pub async fn claim_next_analysis_job(pool: &SqlitePool) -> Result<Option<ClaimedAnalysisJob>> {
    let row = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'running', error_message = NULL, started_at = ?
        WHERE id = (
            SELECT id FROM analysis_jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
        )
        AND status = 'queued'
        RETURNING id, track_id
        "#,
    )
    .bind(time::now_db())
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<ClaimedAnalysisJob> {
        Ok(ClaimedAnalysisJob {
            id: row.try_get("id")?,
            track_id: row.try_get("track_id")?,
        })
    })
    .transpose()
}

/// Record a finished analysis; returns false if the job was not `running`
pub async fn mark_analysis_done(
    pool: &SqlitePool,
    analysis_id: &str,
    bpm: f64,
    confidence: f64,
) -> Result<bool> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(Error::InvalidInput(format!("bpm must be positive, got {}", bpm)));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(Error::InvalidInput(format!(
            "confidence must be within [0, 1], got {}",
            confidence
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET bpm = ?, confidence = ?, status = 'done', error_message = NULL, finished_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(bpm)
    .bind(confidence)
    .bind(time::now_db())
    .bind(analysis_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a failed analysis; returns false if the job was not `running`
///
/// The message is cut to 500 characters before storage.
pub async fn mark_analysis_failed(pool: &SqlitePool, analysis_id: &str, message: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'failed', error_message = ?, finished_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(truncate_error_message(message))
    .bind(time::now_db())
    .bind(analysis_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Load an analysis job by id
pub async fn get_analysis_job(pool: &SqlitePool, analysis_id: &str) -> Result<Option<AnalysisJob>> {
    let sql = format!("SELECT {} FROM analysis_jobs WHERE id = ?", ANALYSIS_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(analysis_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(analysis_from_row).transpose()
}

/// Load the analysis job of a track
pub async fn get_analysis_for_track(pool: &SqlitePool, track_id: &str) -> Result<Option<AnalysisJob>> {
    let sql = format!("SELECT {} FROM analysis_jobs WHERE track_id = ?", ANALYSIS_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(track_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(analysis_from_row).transpose()
}

fn analysis_from_row(row: &SqliteRow) -> Result<AnalysisJob> {
    Ok(AnalysisJob {
        id: row.try_get("id")?,
        track_id: row.try_get("track_id")?,
        status: status_column(row)?,
        bpm: row.try_get("bpm")?,
        confidence: row.try_get("confidence")?,
        error_message: row.try_get("error_message")?,
        created_at: time_column(row, "created_at")?,
        started_at: optional_time_column(row, "started_at")?,
        finished_at: optional_time_column(row, "finished_at")?,
    })
}
