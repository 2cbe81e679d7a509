//! Database Test Utilities

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tempo_common::db::JobStatus;
use tokio::task::JoinHandle;

/// File name used by [`create_test_db`]
pub const TEST_DB_FILE: &str = "test_tempo.db";

/// Create temporary test database with tables created
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join(TEST_DB_FILE);
    let pool = tempo_common::db::init_database(&db_path).await.unwrap();
    (temp_dir, pool)
}

/// Write a fake source file into the object store and register its track
pub async fn seed_track(pool: &SqlitePool, objects_root: &Path, key: &str) -> String {
    let path = objects_root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"ID3 fake mp3 payload").unwrap();
    tempo_worker::db::register_track(pool, key).await.unwrap()
}

/// Pretend a running job was claimed long ago
pub async fn backdate_started_at(pool: &SqlitePool, table: &str, id: &str) {
    let sql = format!(
        "UPDATE {} SET started_at = '2000-01-01T00:00:00.000000Z' WHERE id = ?",
        table
    );
    sqlx::query(&sql).bind(id).execute(pool).await.unwrap();
}

/// Second pool on an existing database that gives up on a lock after `busy`
pub async fn open_pool_with_busy_timeout(db_path: &Path, busy: Duration) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(busy);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .unwrap()
}

/// Take the database write lock now and release it after `hold`
///
/// Returns once the lock is held; await the handle to wait for the release.
pub async fn hold_write_lock(pool: &SqlitePool, hold: Duration) -> JoinHandle<()> {
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await.unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(hold).await;
        sqlx::query("COMMIT").execute(&mut *conn).await.unwrap();
    })
}

/// Poll until the analysis job reaches `status`
pub async fn wait_for_analysis_status(pool: &SqlitePool, analysis_id: &str, status: JobStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let row = tempo_worker::db::get_analysis_job(pool, analysis_id)
                .await
                .unwrap()
                .unwrap();
            if row.status == status {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
