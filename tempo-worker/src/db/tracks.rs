//! Track lookup
//!
//! Tracks belong to the request layer. The worker reads the source object
//! key; `register_track` exists so the queue can be seeded without it.

use sqlx::{Row, SqlitePool};
use tempo_common::db::Track;
use tempo_common::{time, Error, Result};
use uuid::Uuid;

use super::time_column;

/// Insert a track pointing at `object_key`; returns the new track id
pub async fn register_track(pool: &SqlitePool, object_key: &str) -> Result<String> {
    if object_key.trim().is_empty() {
        return Err(Error::InvalidInput("object key must not be empty".to_string()));
    }

    let track_id = Uuid::new_v4().to_string();

    sqlx::query("INSERT INTO tracks (id, original_object_key, created_at) VALUES (?, ?, ?)")
        .bind(&track_id)
        .bind(object_key)
        .bind(time::now_db())
        .execute(pool)
        .await?;

    Ok(track_id)
}

/// Load a track
pub async fn get_track(pool: &SqlitePool, track_id: &str) -> Result<Option<Track>> {
    let row = sqlx::query("SELECT id, original_object_key, created_at FROM tracks WHERE id = ?")
        .bind(track_id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| -> Result<Track> {
        Ok(Track {
            id: row.try_get("id")?,
            original_object_key: row.try_get("original_object_key")?,
            created_at: time_column(&row, "created_at")?,
        })
    })
    .transpose()
}

/// Source media locator for a track, `None` if the track does not exist
pub async fn source_key(pool: &SqlitePool, track_id: &str) -> Result<Option<String>> {
    let key = sqlx::query_scalar("SELECT original_object_key FROM tracks WHERE id = ?")
        .bind(track_id)
        .fetch_optional(pool)
        .await?;

    Ok(key)
}

pub(crate) async fn track_exists(pool: &SqlitePool, track_id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tracks WHERE id = ?)")
        .bind(track_id)
        .fetch_one(pool)
        .await?;

    Ok(exists)
}
