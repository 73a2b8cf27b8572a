//! # Job Registry
//!
//! One controller per job kind, built once at bootstrap and passed by
//! reference to whatever needs it.
//!
//! Controllers are generic over their job; [`SyncControl`] erases the item
//! type so heterogeneous jobs can live in one map.

use async_trait::async_trait;
use bridge_traits::{BackgroundExecutor, BridgeError, TaskHandler};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::controller::{BackgroundSync, SyncJob};
use crate::error::{Result, SyncError};
use crate::job::{HelperWindow, JobState, StartOptions, SyncProgress, WindowReport};

/// Known job kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// Media library attachments
    Library,
    /// Compatibility and custom folders
    NonLibrary,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Library => "library",
            SyncKind::NonLibrary => "non_library",
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "library" => Ok(SyncKind::Library),
            "non_library" => Ok(SyncKind::NonLibrary),
            other => Err(SyncError::InvalidKind(other.to_string())),
        }
    }
}

/// Object-safe operator surface of a controller
#[async_trait]
pub trait SyncControl: Send + Sync {
    fn action(&self) -> &str;
    fn name(&self) -> &str;
    fn helper_window(&self) -> HelperWindow;

    /// Ids this controller expects trigger handlers under
    fn trigger_ids(&self) -> Vec<String>;

    async fn start(&self, options: StartOptions) -> Result<bool>;
    async fn stop(&self) -> Result<()>;
    /// Request a window through the scheduled trigger
    async fn dispatch(&self) -> Result<()>;
    async fn run_window(&self) -> Result<WindowReport>;
    async fn handle_trigger(&self);
    async fn state(&self) -> Result<JobState>;
    async fn is_process_running(&self) -> Result<bool>;
    async fn progress(&self) -> Result<SyncProgress>;
    async fn process_notice(&self) -> Result<Option<String>>;
    async fn failed_items(&self) -> Result<Vec<String>>;
    async fn reset_progress(&self) -> Result<()>;
}

#[async_trait]
impl<J: SyncJob> SyncControl for BackgroundSync<J> {
    fn action(&self) -> &str {
        self.job().action()
    }

    fn name(&self) -> &str {
        self.job().name()
    }

    fn helper_window(&self) -> HelperWindow {
        self.job().helper_window()
    }

    fn trigger_ids(&self) -> Vec<String> {
        vec![
            self.dispatcher().dispatch_task_id(),
            self.dispatcher().healthcheck_task_id(),
        ]
    }

    async fn start(&self, options: StartOptions) -> Result<bool> {
        BackgroundSync::start(self, options).await
    }

    async fn stop(&self) -> Result<()> {
        BackgroundSync::stop(self).await
    }

    async fn dispatch(&self) -> Result<()> {
        BackgroundSync::dispatch(self).await
    }

    async fn run_window(&self) -> Result<WindowReport> {
        BackgroundSync::run_window(self).await
    }

    async fn handle_trigger(&self) {
        BackgroundSync::handle_trigger(self).await
    }

    async fn state(&self) -> Result<JobState> {
        BackgroundSync::state(self).await
    }

    async fn is_process_running(&self) -> Result<bool> {
        BackgroundSync::is_process_running(self).await
    }

    async fn progress(&self) -> Result<SyncProgress> {
        BackgroundSync::progress(self).await
    }

    async fn process_notice(&self) -> Result<Option<String>> {
        self.get_process_notice().await
    }

    async fn failed_items(&self) -> Result<Vec<String>> {
        self.job().failed_items().await
    }

    async fn reset_progress(&self) -> Result<()> {
        self.job().reset_progress().await
    }
}

/// Registry mapping each job kind to its controller
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: BTreeMap<SyncKind, Arc<dyn SyncControl>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller; each kind may be registered once
    pub fn register(&mut self, kind: SyncKind, control: Arc<dyn SyncControl>) -> Result<()> {
        if self.jobs.contains_key(&kind) {
            return Err(SyncError::DuplicateJob {
                kind: kind.to_string(),
            });
        }
        debug!(kind = %kind, action = control.action(), "Registered sync job");
        self.jobs.insert(kind, control);
        Ok(())
    }

    pub fn get(&self, kind: SyncKind) -> Result<Arc<dyn SyncControl>> {
        self.jobs
            .get(&kind)
            .cloned()
            .ok_or_else(|| SyncError::JobNotFound {
                kind: kind.to_string(),
            })
    }

    /// Look a controller up by its action name
    pub fn by_action(&self, action: &str) -> Option<Arc<dyn SyncControl>> {
        self.jobs
            .values()
            .find(|control| control.action() == action)
            .cloned()
    }

    pub fn kinds(&self) -> Vec<SyncKind> {
        self.jobs.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SyncKind, &Arc<dyn SyncControl>)> {
        self.jobs.iter().map(|(kind, control)| (*kind, control))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Register a trigger handler for every controller.
    ///
    /// Handlers hold a weak reference so the executor does not keep
    /// controllers alive after the registry is dropped.
    pub async fn bind_triggers(&self, executor: &dyn BackgroundExecutor) -> Result<()> {
        for control in self.jobs.values() {
            for task_id in control.trigger_ids() {
                let handler = trigger_handler(Arc::downgrade(control));
                executor
                    .register_handler(&task_id, handler)
                    .await
                    .map_err(|e| SyncError::Scheduler(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn trigger_handler(control: Weak<dyn SyncControl>) -> TaskHandler {
    Arc::new(move || {
        let control = control.clone();
        async move {
            match control.upgrade() {
                Some(control) => control.handle_trigger().await,
                None => debug!("Trigger fired after its controller was dropped"),
            }
            Ok::<(), BridgeError>(())
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("library".parse::<SyncKind>().unwrap(), SyncKind::Library);
        assert_eq!("Non-Library".parse::<SyncKind>().unwrap(), SyncKind::NonLibrary);
        assert!(matches!(
            "thumbnails".parse::<SyncKind>(),
            Err(SyncError::InvalidKind(_))
        ));
    }

    #[test]
    fn test_missing_kind_is_reported() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(SyncKind::Library),
            Err(SyncError::JobNotFound { .. })
        ));
    }
}
