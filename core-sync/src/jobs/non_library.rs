//! Compatibility and custom folders
//!
//! Mirrors files that live under the upload directory but are not part of
//! the media library: theme compatibility files, plugin output, custom
//! folders configured by the site owner.

use async_trait::async_trait;
use bridge_traits::{MediaCatalog, MediaSyncer};
use core_runtime::logging::strip_path;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::controller::SyncJob;
use crate::error::{ErrorKind, Result, TaskError};
use crate::job::{HelperWindow, StartOptions, TaskContext, TaskOutcome};
use crate::progress::{ProgressTracker, SyncMode};

pub const NON_LIBRARY_ACTION: &str = "bg_non_library_sync";

const NON_LIBRARY_CRON_MINUTES: u64 = 5;

/// Job over relative file paths outside the media library
pub struct NonLibrarySync {
    catalog: Arc<dyn MediaCatalog>,
    syncer: Arc<dyn MediaSyncer>,
    progress: ProgressTracker,
}

impl NonLibrarySync {
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

    fn mode(ctx: &TaskContext) -> SyncMode {
        if ctx.options.cli {
            SyncMode::CliOther
        } else {
            SyncMode::Other
        }
    }
}

/// Drop empty entries and repeated paths, keeping first occurrences
fn unique_paths(paths: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| !path.trim().trim_matches('/').is_empty())
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

#[async_trait]
impl SyncJob for NonLibrarySync {
    type Item = String;

    fn action(&self) -> &str {
        NON_LIBRARY_ACTION
    }

    fn name(&self) -> &str {
        "Compatibility and Custom Folders"
    }

    fn helper_window(&self) -> HelperWindow {
        HelperWindow::new(
            "What are Compatibility and Custom Folders?",
            "Some themes and plugins write files into the uploads directory without \
             registering them in the media library. This process copies those files, \
             along with any custom folders you configured, to remote storage so that \
             pages referencing them keep working once local copies are removed.",
        )
    }

    fn cron_interval_minutes(&self) -> Option<u64> {
        Some(NON_LIBRARY_CRON_MINUTES)
    }

    async fn items(&self, _options: &StartOptions) -> Result<Vec<String>> {
        let files = self.catalog.non_library_files().await?;
        Ok(unique_paths(files))
    }

    async fn task(
        &self,
        item: &String,
        ctx: &TaskContext,
    ) -> std::result::Result<TaskOutcome, TaskError> {
        if !self.syncer.is_connected().await {
            return Err(TaskError::Fatal("Not connected to remote storage".to_string()));
        }

        let relative = item.trim_matches('/');
        let absolute = self.catalog.upload_dir().join(relative);
        let started = Instant::now();

        match self.syncer.sync_file(relative, &absolute, true).await {
            Ok(()) => {
                info!(
                    file = strip_path(relative),
                    "{} was successfully synchronised in {:.2} seconds",
                    relative,
                    started.elapsed().as_secs_f64()
                );
                if self.progress.maybe_fix_failed(Self::mode(ctx), item).await? {
                    info!(file = strip_path(relative), "Previously failed file is now synchronised");
                }
                Ok(TaskOutcome::Done)
            }
            Err(err) => {
                let err = TaskError::from(err);
                if err.kind() == ErrorKind::Unprocessable {
                    warn!(file = strip_path(relative), error = %err, "File cannot be synchronised");
                    self.progress.store_failed(Self::mode(ctx), item).await?;
                }
                Err(err)
            }
        }
    }

    async fn failed_items(&self) -> Result<Vec<String>> {
        let mut fails = self.progress.get_fails(SyncMode::Other).await?;
        for item in self.progress.get_fails(SyncMode::CliOther).await? {
            if !fails.contains(&item) {
                fails.push(item);
            }
        }
        Ok(fails)
    }

    async fn reset_progress(&self) -> Result<()> {
        self.progress.clear_fails(SyncMode::Other).await?;
        self.progress.clear_fails(SyncMode::CliOther).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_paths_filters_and_dedups() {
        let paths = vec![
            "2024/a.css".to_string(),
            "".to_string(),
            "/".to_string(),
            "fonts/b.woff".to_string(),
            "2024/a.css".to_string(),
        ];
        assert_eq!(unique_paths(paths), vec!["2024/a.css", "fonts/b.woff"]);
    }
}
