//! Render job store operations

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tempo_common::db::{
    truncate_error_message, ClaimedRenderJob, RenderJob, MAX_TARGET_BPM, MIN_TARGET_BPM,
};
use tempo_common::{time, Error, Result};
use uuid::Uuid;

use super::{optional_time_column, status_column, time_column, track_exists};

const RENDER_COLUMNS: &str = "id, track_id, target_bpm, tempo_ratio, preserve_pitch, status, \
     output_key, error_message, created_at, started_at, finished_at";

/// Queue a render of `track_id` at `target_bpm`; returns the render job id
pub async fn enqueue_render(
    pool: &SqlitePool,
    track_id: &str,
    target_bpm: f64,
    preserve_pitch: bool,
) -> Result<String> {
    if !target_bpm.is_finite() || !(MIN_TARGET_BPM..=MAX_TARGET_BPM).contains(&target_bpm) {
        return Err(Error::InvalidInput(format!(
            "target_bpm must be within [{}, {}], got {}",
            MIN_TARGET_BPM, MAX_TARGET_BPM, target_bpm
        )));
    }
    if !track_exists(pool, track_id).await? {
        return Err(Error::NotFound(format!("track {}", track_id)));
    }

    let render_id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO render_jobs (id, track_id, target_bpm, preserve_pitch, status, created_at)
        VALUES (?, ?, ?, ?, 'queued', ?)
        "#,
    )
    .bind(&render_id)
    .bind(track_id)
    .bind(target_bpm)
    .bind(preserve_pitch)
    .bind(time::now_db())
    .execute(pool)
    .await?;

    Ok(render_id)
}

/// Claim the oldest queued render job and mark it `running`
pub async fn claim_next_render_job(pool: &SqlitePool) -> Result<Option<ClaimedRenderJob>> {
    let row = sqlx::query(
        r#"
        UPDATE render_jobs
        SET status = 'running', error_message = NULL, started_at = ?
        WHERE id = (
            SELECT id FROM render_jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
        )
        AND status = 'queued'
        RETURNING id, track_id, target_bpm, preserve_pitch
        "#,
    )
    .bind(time::now_db())
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<ClaimedRenderJob> {
        Ok(ClaimedRenderJob {
            id: row.try_get("id")?,
            track_id: row.try_get("track_id")?,
            target_bpm: row.try_get("target_bpm")?,
            preserve_pitch: row.try_get("preserve_pitch")?,
        })
    })
    .transpose()
}

/// Record a finished render; returns false if the job was not `running`
pub async fn mark_render_done(
    pool: &SqlitePool,
    render_id: &str,
    tempo_ratio: f64,
    output_key: &str,
) -> Result<bool> {
    if output_key.is_empty() {
        return Err(Error::InvalidInput("output key must not be empty".to_string()));
    }

    let result = sqlx::query(
        r#"
        UPDATE render_jobs
        SET tempo_ratio = ?, output_key = ?, status = 'done', error_message = NULL, finished_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(tempo_ratio)
    .bind(output_key)
    .bind(time::now_db())
    .bind(render_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a failed render; returns false if the job was not `running`
pub async fn mark_render_failed(pool: &SqlitePool, render_id: &str, message: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE render_jobs
        SET status = 'failed', error_message = ?, finished_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(truncate_error_message(message))
    .bind(time::now_db())
    .bind(render_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Load a render job by id
pub async fn get_render_job(pool: &SqlitePool, render_id: &str) -> Result<Option<RenderJob>> {
    let sql = format!("SELECT {} FROM render_jobs WHERE id = ?", RENDER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(render_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(render_from_row).transpose()
}

fn render_from_row(row: &SqliteRow) -> Result<RenderJob> {
    Ok(RenderJob {
        id: row.try_get("id")?,
        track_id: row.try_get("track_id")?,
        target_bpm: row.try_get("target_bpm")?,
        tempo_ratio: row.try_get("tempo_ratio")?,
        preserve_pitch: row.try_get("preserve_pitch")?,
        status: status_column(row)?,
        output_key: row.try_get("output_key")?,
        error_message: row.try_get("error_message")?,
        created_at: time_column(row, "created_at")?,
        started_at: optional_time_column(row, "started_at")?,
        finished_at: optional_time_column(row, "finished_at")?,
    })
}
