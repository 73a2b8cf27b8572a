//! Media Catalog and Synchronization Delegates
//!
//! The sync engine never talks to a storage backend itself. It asks a
//! [`MediaCatalog`] which items exist and hands each one to a
//! [`MediaSyncer`] that performs the actual upload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::Result;

/// A library attachment and the files that belong to it
///
/// `files` are relative to [`MediaCatalog::upload_dir`]: the original upload
/// first, then generated sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: i64,
    pub files: Vec<String>,
}

/// Classified failure reported by a [`MediaSyncer`]
///
/// The classification decides what the job does next:
/// - `Fatal`: the whole job stops (credentials revoked, bucket gone)
/// - `Unprocessable`: this item is skipped, the job continues
/// - `Other`: unclassified; treated like `Fatal`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("{0}")]
    Fatal(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Other(String),
}

/// Item source provider
///
/// # Example
///
/// ```ignore
/// use bridge_traits::media::MediaCatalog;
///
/// async fn count(catalog: &dyn MediaCatalog) -> Result<usize> {
///     Ok(catalog.attachment_ids().await?.len())
/// }
/// ```
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// Relative paths of files that live outside the media library
    /// (compatibility plugins, custom folders). May contain duplicates or
    /// empty entries.
    async fn non_library_files(&self) -> Result<Vec<String>>;

    /// Ids of every attachment in the media library
    async fn attachment_ids(&self) -> Result<Vec<i64>>;

    /// Resolve an attachment, `None` when it no longer exists
    async fn attachment(&self, id: i64) -> Result<Option<MediaAttachment>>;

    /// Base directory relative paths are resolved against
    fn upload_dir(&self) -> PathBuf;
}

/// Per-item task delegate
#[async_trait]
pub trait MediaSyncer: Send + Sync {
    /// Whether the remote storage is reachable and authorized
    async fn is_connected(&self) -> bool;

    /// Upload one file
    ///
    /// `force` re-uploads even when the remote copy looks current.
    async fn sync_file(
        &self,
        relative_path: &str,
        absolute_path: &Path,
        force: bool,
    ) -> std::result::Result<(), MediaError>;
}
