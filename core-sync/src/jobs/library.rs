//! Media library sync
//!
//! Walks attachment ids from newest to oldest and uploads every file of each
//! attachment. Progress is checkpointed per id, so an interrupted pass can be
//! resumed or continued from a given id.

use async_trait::async_trait;
use bridge_traits::{MediaCatalog, MediaSyncer};
use core_runtime::logging::strip_path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::SyncJob;
use crate::error::{ErrorKind, Result, SyncError, TaskError};
use crate::job::{HelperWindow, StartOptions, TaskContext, TaskOutcome};
use crate::progress::{ProgressTracker, SyncMode};

pub const LIBRARY_ACTION: &str = "bg_library_sync";

/// Job over media library attachment ids
pub struct LibrarySync {
    catalog: Arc<dyn MediaCatalog>,
    syncer: Arc<dyn MediaSyncer>,
    progress: ProgressTracker,
}

impl LibrarySync {
    pub fn new(
        catalog: Arc<dyn MediaCatalog>,
        syncer: Arc<dyn MediaSyncer>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            catalog,
            syncer,
            progress,
        }
    }

    fn mode(options: &StartOptions) -> SyncMode {
        if options.cli {
            SyncMode::CliImages
        } else {
            SyncMode::Images
        }
    }

    async fn record_failure(&self, mode: SyncMode, id: i64, err: TaskError) -> TaskError {
        if err.kind() == ErrorKind::Unprocessable {
            warn!(attachment = id, error = %err, "Attachment cannot be synchronised");
            if let Err(store_err) = self.progress.store_failed(mode, &id.to_string()).await {
                return TaskError::from(store_err);
            }
        }
        err
    }
}

#[async_trait]
impl SyncJob for LibrarySync {
    type Item = i64;

    fn action(&self) -> &str {
        LIBRARY_ACTION
    }

    fn name(&self) -> &str {
        "Media Library"
    }

    fn helper_window(&self) -> HelperWindow {
        HelperWindow::new(
            "What is the Media Library sync?",
            "Copies every attachment of the media library, including all generated \
             image sizes, to remote storage. Newer uploads are handled first. If the \
             process is interrupted it can be resumed where it left off.",
        )
    }

    async fn items(&self, options: &StartOptions) -> Result<Vec<i64>> {
        if !self.syncer.is_connected().await {
            return Err(SyncError::ItemSource(
                "Not connected to remote storage".to_string(),
            ));
        }

        let mut ids = self.catalog.attachment_ids().await?;
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();

        self.progress
            .non_processed_ids(Self::mode(options), ids, options.resume, options.start_from)
            .await
    }

    async fn task(&self, id: &i64, ctx: &TaskContext) -> std::result::Result<TaskOutcome, TaskError> {
        let id = *id;
        let mode = Self::mode(&ctx.options);

        if !self.syncer.is_connected().await {
            return Err(TaskError::Fatal("Not connected to remote storage".to_string()));
        }

        let Some(attachment) = self.catalog.attachment(id).await? else {
            let err = TaskError::Unprocessable(format!("Attachment {} no longer exists", id));
            return Err(self.record_failure(mode, id, err).await);
        };

        let upload_dir = self.catalog.upload_dir();
        for file in &attachment.files {
            let relative = file.trim_matches('/');
            if let Err(err) = self
                .syncer
                .sync_file(relative, &upload_dir.join(relative), false)
                .await
            {
                return Err(self.record_failure(mode, id, TaskError::from(err)).await);
            }
            debug!(attachment = id, file = strip_path(relative), "Synchronised file");
        }

        if self.progress.maybe_fix_failed(mode, &id.to_string()).await? {
            info!(attachment = id, "Previously failed attachment is now synchronised");
        }
        self.progress
            .store_current_progress(mode, id, ctx.options.cli)
            .await?;

        Ok(TaskOutcome::Done)
    }

    async fn failed_items(&self) -> Result<Vec<String>> {
        let mut fails = self.progress.get_fails(SyncMode::Images).await?;
        for item in self.progress.get_fails(SyncMode::CliImages).await? {
            if !fails.contains(&item) {
                fails.push(item);
            }
        }
        Ok(fails)
    }

    async fn reset_progress(&self) -> Result<()> {
        for mode in [SyncMode::Images, SyncMode::CliImages] {
            self.progress.reset_current_progress(mode).await?;
            self.progress.clear_fails(mode).await?;
        }
        Ok(())
    }
}
