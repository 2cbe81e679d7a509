//! File system object store
//!
//! Objects live under a root folder at their key's relative path. Suits a
//! single host or a shared volume mounted by every worker.
//!
//! Source locators may also be absolute file paths, which is how uploads
//! stored directly on disk are recorded. Published artifacts always get
//! relative keys under the root.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::ObjectStore;
use crate::error::{JobError, JobResult};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key below the root; absolute keys and `..` are rejected
    pub fn object_path(&self, key: &str) -> JobResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(JobError::Storage(format!("invalid object key {:?}", key)));
        }
        Ok(self.root.join(relative))
    }

    /// Resolve a source locator: an absolute path as is, otherwise a key
    pub fn source_path(&self, locator: &str) -> JobResult<PathBuf> {
        let path = Path::new(locator);
        if !path.is_absolute() {
            return self.object_path(locator);
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(JobError::Storage(format!("invalid source path {:?}", locator)));
        }
        Ok(path.to_path_buf())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn download(&self, key: &str, dest: &Path) -> JobResult<()> {
        let src = self.source_path(key)?;

        match fs::metadata(&src).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(JobError::NotFound(format!("source media {} is not a file", key))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JobError::NotFound(format!("source media missing: {}", key)));
            }
            Err(e) => return Err(JobError::Storage(format!("stat {}: {}", key, e))),
        }

        fs::copy(&src, dest)
            .await
            .map_err(|e| JobError::Storage(format!("download {}: {}", key, e)))?;

        debug!(key, dest = %dest.display(), "Downloaded object");
        Ok(())
    }

    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> JobResult<()> {
        let dest = self.object_path(key)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| JobError::Storage(format!("create {}: {}", parent.display(), e)))?;
        }

        // Copy to a sibling temp name first so readers never see a partial object
        let partial = dest.with_extension("partial");
        let published = match fs::copy(src, &partial).await {
            Ok(_) => fs::rename(&partial, &dest).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), error = %cleanup, "Could not remove partial upload");
                }
            }
            return Err(JobError::Storage(format!("upload {}: {}", key, e)));
        }

        debug!(key, content_type, "Uploaded object");
        Ok(())
    }
}
