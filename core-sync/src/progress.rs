//! # Resumable Progress
//!
//! Checkpoints and failure ledgers for jobs that walk numeric ids.
//!
//! ## Checkpoint
//!
//! Library ids are processed in descending order. The checkpoint of a mode
//! is a pair of ids:
//!
//! - `sync_{mode}_first_processed`: the first (highest) id handled in the
//!   current pass, written once
//! - `sync_{mode}_last_processed`: the lowest id handled so far
//!
//! On resume, an id still needs work if it is above `first` (uploaded after
//! the pass began) or below `last` (not reached yet).
//!
//! ## Failure Ledger
//!
//! `sync_failed_{mode}` holds the ids that ended as unprocessable. An id is
//! removed again once a later attempt succeeds.

use bridge_traits::{SettingsStore, SettingsStoreExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;

/// Progress namespace for checkpoints and failure ledgers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Media library attachments
    Images,
    /// Files outside the library (compatibility and custom folders)
    Other,
    /// Media library, started from the command line
    CliImages,
    /// Other files, started from the command line
    CliOther,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Images => "images",
            SyncMode::Other => "other",
            SyncMode::CliImages => "cli_images",
            SyncMode::CliOther => "cli_other",
        }
    }

    /// Parse a mode name; anything unknown falls back to `Images`.
    pub fn normalize(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "other" => SyncMode::Other,
            "cli_images" => SyncMode::CliImages,
            "cli_other" => SyncMode::CliOther,
            _ => SyncMode::Images,
        }
    }

    pub fn is_cli(&self) -> bool {
        matches!(self, SyncMode::CliImages | SyncMode::CliOther)
    }

    pub fn all() -> [SyncMode; 4] {
        [
            SyncMode::Images,
            SyncMode::Other,
            SyncMode::CliImages,
            SyncMode::CliOther,
        ]
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SyncMode {
    fn from(name: &str) -> Self {
        SyncMode::normalize(name)
    }
}

/// Persisted checkpoint of one mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub first_processed: i64,
    pub last_processed: i64,
}

/// Reads and writes checkpoints and failure ledgers
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn SettingsStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    fn first_key(mode: SyncMode) -> String {
        format!("sync_{}_first_processed", mode)
    }

    fn last_key(mode: SyncMode) -> String {
        format!("sync_{}_last_processed", mode)
    }

    fn ledger_key(mode: SyncMode) -> String {
        format!("sync_failed_{}", mode)
    }

    /// Record that `id` was handled.
    ///
    /// `first_processed` is written only once per pass. `last_processed`
    /// moves down to `id`, or anywhere when `force` is set (command-line
    /// runs may walk ids in any order).
    pub async fn store_current_progress(&self, mode: SyncMode, id: i64, force: bool) -> Result<()> {
        let first_key = Self::first_key(mode);
        if self.store.get_as::<i64>(&first_key).await?.is_none() {
            self.store.set_as(&first_key, &id).await?;
        }

        let last_key = Self::last_key(mode);
        let update_last = match self.store.get_as::<i64>(&last_key).await? {
            None => true,
            Some(last) => force || id < last,
        };
        if update_last {
            self.store.set_as(&last_key, &id).await?;
        }
        Ok(())
    }

    /// Both checkpoint ids, or `None` unless both are present
    pub async fn retrieve_current_progress(&self, mode: SyncMode) -> Result<Option<Checkpoint>> {
        let first = self.store.get_as::<i64>(&Self::first_key(mode)).await?;
        let last = self.store.get_as::<i64>(&Self::last_key(mode)).await?;
        Ok(match (first, last) {
            (Some(first_processed), Some(last_processed)) => Some(Checkpoint {
                first_processed,
                last_processed,
            }),
            _ => None,
        })
    }

    pub async fn reset_current_progress(&self, mode: SyncMode) -> Result<()> {
        self.store.delete(&Self::first_key(mode)).await?;
        self.store.delete(&Self::last_key(mode)).await?;
        debug!(mode = %mode, "Reset checkpoint");
        Ok(())
    }

    /// Filter `ids` down to the ones a run still has to process.
    ///
    /// Without `resume`, or when no checkpoint exists, the checkpoint is
    /// reset and every id is returned. A non-zero `start_from` overrides the
    /// lower bound so that `start_from` itself is processed again.
    pub async fn non_processed_ids(
        &self,
        mode: SyncMode,
        ids: Vec<i64>,
        resume: bool,
        start_from: Option<i64>,
    ) -> Result<Vec<i64>> {
        let checkpoint = if resume {
            self.retrieve_current_progress(mode).await?
        } else {
            None
        };

        let Some(mut checkpoint) = checkpoint else {
            self.reset_current_progress(mode).await?;
            return Ok(ids);
        };

        if let Some(from) = start_from.filter(|id| *id != 0) {
            checkpoint.last_processed = from + 1;
        }

        let total = ids.len();
        let remaining: Vec<i64> = ids
            .into_iter()
            .filter(|id| *id > checkpoint.first_processed || *id < checkpoint.last_processed)
            .collect();

        info!(
            mode = %mode,
            first = checkpoint.first_processed,
            last = checkpoint.last_processed,
            skipped = total - remaining.len(),
            "Resuming from checkpoint"
        );
        Ok(remaining)
    }

    /// Add `id` to the failure ledger; duplicates are ignored
    pub async fn store_failed(&self, mode: SyncMode, id: &str) -> Result<()> {
        let key = Self::ledger_key(mode);
        let mut fails = self.get_fails(mode).await?;
        if fails.iter().any(|existing| existing == id) {
            return Ok(());
        }
        fails.push(id.to_string());
        self.store.set_as(&key, &fails).await?;
        Ok(())
    }

    /// Remove `id` from the failure ledger if present
    pub async fn maybe_fix_failed(&self, mode: SyncMode, id: &str) -> Result<bool> {
        let mut fails = self.get_fails(mode).await?;
        let before = fails.len();
        fails.retain(|existing| existing != id);
        if fails.len() == before {
            return Ok(false);
        }
        self.store.set_as(&Self::ledger_key(mode), &fails).await?;
        Ok(true)
    }

    /// Ids currently recorded as failed, oldest first
    pub async fn get_fails(&self, mode: SyncMode) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_as::<Vec<String>>(&Self::ledger_key(mode))
            .await?
            .unwrap_or_default())
    }

    pub async fn clear_fails(&self, mode: SyncMode) -> Result<()> {
        self.store.delete(&Self::ledger_key(mode)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::MemorySettingsStore;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(Arc::new(MemorySettingsStore::new()))
    }

    #[test]
    fn test_unknown_mode_normalizes_to_images() {
        assert_eq!(SyncMode::normalize("other"), SyncMode::Other);
        assert_eq!(SyncMode::normalize(" CLI_Other "), SyncMode::CliOther);
        assert_eq!(SyncMode::normalize("thumbnails"), SyncMode::Images);
        assert_eq!(SyncMode::from(""), SyncMode::Images);
    }

    #[tokio::test]
    async fn test_first_is_written_once_last_moves_down() {
        let tracker = tracker();
        tracker.store_current_progress(SyncMode::Images, 50, false).await.unwrap();
        tracker.store_current_progress(SyncMode::Images, 40, false).await.unwrap();
        tracker.store_current_progress(SyncMode::Images, 45, false).await.unwrap();

        let checkpoint = tracker
            .retrieve_current_progress(SyncMode::Images)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.first_processed, 50);
        assert_eq!(checkpoint.last_processed, 40);
    }

    #[tokio::test]
    async fn test_forced_progress_moves_last_up() {
        let tracker = tracker();
        tracker.store_current_progress(SyncMode::CliImages, 50, true).await.unwrap();
        tracker.store_current_progress(SyncMode::CliImages, 10, true).await.unwrap();
        tracker.store_current_progress(SyncMode::CliImages, 30, true).await.unwrap();

        let checkpoint = tracker
            .retrieve_current_progress(SyncMode::CliImages)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.last_processed, 30);
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_range() {
        let tracker = tracker();
        for id in [8, 7, 6] {
            tracker.store_current_progress(SyncMode::Images, id, false).await.unwrap();
        }

        let ids = vec![10, 9, 8, 7, 6, 5, 4];
        let remaining = tracker
            .non_processed_ids(SyncMode::Images, ids, true, None)
            .await
            .unwrap();
        assert_eq!(remaining, vec![10, 9, 5, 4]);
    }

    #[tokio::test]
    async fn test_start_from_reprocesses_that_id() {
        let tracker = tracker();
        for id in [8, 7, 6] {
            tracker.store_current_progress(SyncMode::Images, id, false).await.unwrap();
        }

        let remaining = tracker
            .non_processed_ids(SyncMode::Images, vec![8, 7, 6, 5], true, Some(7))
            .await
            .unwrap();
        assert_eq!(remaining, vec![7, 6, 5]);
    }

    #[tokio::test]
    async fn test_fresh_start_resets_checkpoint() {
        let tracker = tracker();
        tracker.store_current_progress(SyncMode::Images, 8, false).await.unwrap();

        let remaining = tracker
            .non_processed_ids(SyncMode::Images, vec![8, 7], false, None)
            .await
            .unwrap();
        assert_eq!(remaining, vec![8, 7]);
        assert!(tracker
            .retrieve_current_progress(SyncMode::Images)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_returns_everything() {
        let tracker = tracker();
        let remaining = tracker
            .non_processed_ids(SyncMode::Other, vec![3, 2, 1], true, Some(2))
            .await
            .unwrap();
        assert_eq!(remaining, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_failure_ledger() {
        let tracker = tracker();
        tracker.store_failed(SyncMode::Images, "12").await.unwrap();
        tracker.store_failed(SyncMode::Images, "12").await.unwrap();
        tracker.store_failed(SyncMode::Images, "15").await.unwrap();
        tracker.store_failed(SyncMode::Other, "a/b.txt").await.unwrap();

        assert_eq!(tracker.get_fails(SyncMode::Images).await.unwrap(), vec!["12", "15"]);

        assert!(tracker.maybe_fix_failed(SyncMode::Images, "12").await.unwrap());
        assert!(!tracker.maybe_fix_failed(SyncMode::Images, "99").await.unwrap());
        assert_eq!(tracker.get_fails(SyncMode::Images).await.unwrap(), vec!["15"]);
        assert_eq!(tracker.get_fails(SyncMode::Other).await.unwrap(), vec!["a/b.txt"]);

        tracker.clear_fails(SyncMode::Images).await.unwrap();
        assert!(tracker.get_fails(SyncMode::Images).await.unwrap().is_empty());
    }
}
