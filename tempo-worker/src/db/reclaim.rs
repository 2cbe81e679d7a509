//! Stale running-job reclaim
//!
//! A worker that dies between claim and write-back leaves its row `running`
//! forever. Rows running longer than a threshold are failed as abandoned.
//! They are not re-queued: failed jobs are re-enqueued by the request layer.

use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tempo_common::db::truncate_error_message;
use tempo_common::{time, Error, Result};

/// Rows failed by one reclaim pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub analysis: u64,
    pub render: u64,
}

impl ReclaimReport {
    pub fn total(&self) -> u64 {
        self.analysis + self.render
    }
}

/// Fail every job that has been `running` for longer than `older_than`
pub async fn reclaim_stale_jobs(pool: &SqlitePool, older_than: Duration) -> Result<ReclaimReport> {
    let threshold = chrono::Duration::from_std(older_than)
        .map_err(|e| Error::InvalidInput(format!("stale threshold out of range: {}", e)))?;
    let cutoff = time::to_db(Utc::now() - threshold);
    let now = time::now_db();
    let message = truncate_error_message(&format!(
        "abandoned: worker did not finish within {}s",
        older_than.as_secs()
    ));

    let analysis = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'failed', error_message = ?, finished_at = ?
        WHERE status = 'running' AND started_at IS NOT NULL AND started_at < ?
        "#,
    )
    .bind(&message)
    .bind(&now)
    .bind(&cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let render = sqlx::query(
        r#"
        UPDATE render_jobs
        SET status = 'failed', error_message = ?, finished_at = ?
        WHERE status = 'running' AND started_at IS NOT NULL AND started_at < ?
        "#,
    )
    .bind(&message)
    .bind(&now)
    .bind(&cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(ReclaimReport { analysis, render })
}
