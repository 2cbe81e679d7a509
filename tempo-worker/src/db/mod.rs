//! Job store operations
//!
//! The job tables are the only state shared between worker processes. Claims
//! are the single concurrency-control point: each is one conditional UPDATE,
//! and SQLite serializes writers, so a queued row is handed to exactly one
//! caller and a concurrent claimer simply sees the next queued row.
//!
//! Terminal writes only touch rows that are still `running`; they report
//! whether a row changed so repeated calls are harmless.

pub mod analysis_jobs;
pub mod reclaim;
pub mod render_jobs;
pub mod tracks;

pub use analysis_jobs::*;
pub use reclaim::*;
pub use render_jobs::*;
pub use tracks::*;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tempo_common::time;
use tempo_common::db::JobStatus;
use tempo_common::Result;

pub(crate) fn status_column(row: &SqliteRow) -> Result<JobStatus> {
    let status: String = row.try_get("status")?;
    status.parse()
}

pub(crate) fn time_column(row: &SqliteRow, column: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    let value: String = row.try_get(column)?;
    time::from_db(&value)
}

pub(crate) fn optional_time_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    value.as_deref().map(time::from_db).transpose()
}
