//! Object storage collaborator
//!
//! Source media is fetched and rendered artifacts are published through an
//! [`ObjectStore`]. Keys are caller-chosen relative strings.

mod local;

pub use local::LocalObjectStore;

use async_trait::async_trait;
use std::path::Path;

use crate::error::JobResult;

/// Content type of rendered artifacts
pub const RENDER_CONTENT_TYPE: &str = "audio/mpeg";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy object `key` to the local file `dest`
    ///
    /// # Errors
    /// `JobError::NotFound` if the object does not exist
    async fn download(&self, key: &str, dest: &Path) -> JobResult<()>;

    /// Publish the local file `src` as object `key`
    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> JobResult<()>;
}
