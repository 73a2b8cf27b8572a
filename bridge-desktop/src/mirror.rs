//! Local Mirror Syncer using Tokio
//!
//! Treats a local directory as the remote bucket. Useful for desktop runs,
//! demos and end-to-end tests of the sync engine without cloud credentials.

use async_trait::async_trait;
use bridge_traits::media::{MediaError, MediaSyncer};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Default location for durable engine data (settings database)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join("stateless-sync")
}

/// Copies files into a bucket directory, mirroring their relative paths
pub struct LocalMirrorSyncer {
    bucket_dir: PathBuf,
}

impl LocalMirrorSyncer {
    pub fn new(bucket_dir: impl Into<PathBuf>) -> Self {
        Self {
            bucket_dir: bucket_dir.into(),
        }
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    /// Map a relative path into the bucket, refusing anything that escapes it
    fn destination(&self, relative_path: &str) -> Result<PathBuf, MediaError> {
        let relative = Path::new(relative_path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(MediaError::Unprocessable(format!(
                "Invalid object path: {}",
                relative_path
            )));
        }
        Ok(self.bucket_dir.join(relative))
    }

    async fn is_current(source: &Path, destination: &Path) -> bool {
        match (fs::metadata(source).await, fs::metadata(destination).await) {
            (Ok(src), Ok(dst)) => src.len() == dst.len(),
            _ => false,
        }
    }
}

#[async_trait]
impl MediaSyncer for LocalMirrorSyncer {
    async fn is_connected(&self) -> bool {
        fs::metadata(&self.bucket_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn sync_file(
        &self,
        relative_path: &str,
        absolute_path: &Path,
        force: bool,
    ) -> Result<(), MediaError> {
        let destination = self.destination(relative_path)?;

        match fs::metadata(absolute_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(MediaError::Unprocessable(format!(
                    "Not a regular file: {}",
                    absolute_path.display()
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MediaError::Unprocessable(format!(
                    "File not found: {}",
                    absolute_path.display()
                )))
            }
            Err(e) => return Err(MediaError::Other(e.to_string())),
        }

        if !self.is_connected().await {
            return Err(MediaError::Fatal(format!(
                "Bucket directory is not available: {}",
                self.bucket_dir.display()
            )));
        }

        if !force && Self::is_current(absolute_path, &destination).await {
            debug!(object = relative_path, "Object already current; skipping");
            return Ok(());
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MediaError::Other(e.to_string()))?;
        }

        let bytes = fs::copy(absolute_path, &destination)
            .await
            .map_err(|e| MediaError::Other(e.to_string()))?;

        debug!(object = relative_path, bytes, "Mirrored object");
        Ok(())
    }
}
