//! Database retry logic
//!
//! Write-backs race other workers' claims for SQLite's single write lock.
//! A statement that waits out the busy timeout fails with `database is
//! locked`; the job result is still valid, so the write is retried with
//! exponential backoff instead of being turned into a job failure.

use std::future::Future;
use std::time::{Duration, Instant};
use tempo_common::{Error, Result};
use tracing::{debug, error, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(1000);

/// SQLITE_BUSY / SQLITE_LOCKED
pub fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db_err)) => {
            matches!(db_err.code().as_deref(), Some("5") | Some("6"))
                || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}

/// Retry `operation` while it fails on a lock, until `max_wait` has elapsed
///
/// Other errors are returned immediately. Backoff starts at 10ms and doubles
/// up to 1s. The last lock error is returned once the budget is spent.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait: Duration, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !is_lock_error(&err) => return Err(err),
            Err(err) => {
                let elapsed = started.elapsed();
                if elapsed >= max_wait {
                    error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database still locked, giving up"
                    );
                    return Err(err);
                }

                let pause = backoff.min(max_wait - elapsed);
                warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = pause.as_millis() as u64,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(pause).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
