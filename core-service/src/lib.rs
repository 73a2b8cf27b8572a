//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (settings store,
//! background executor, media catalog and syncer) into the background sync
//! engine. Desktop and server hosts typically enable the `desktop-shims`
//! feature, which falls back to the SQLite settings store and the Tokio
//! executor from `bridge-desktop`.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::media::{MediaCatalog, MediaSyncer};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use core_sync::{
    BackgroundSync, HelperWindow, JobDependencies, JobRegistry, JobState, LibrarySync,
    NonLibrarySync, ProgressTracker, StartOptions, SyncControl, SyncKind, SyncProgress,
    WindowReport,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// Item source and task delegate shared by every job.
pub struct CoreDependencies {
    pub catalog: Arc<dyn MediaCatalog>,
    pub syncer: Arc<dyn MediaSyncer>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(catalog: Arc<dyn MediaCatalog>, syncer: Arc<dyn MediaSyncer>) -> Self {
        Self { catalog, syncer }
    }
}

/// Admin listing entry for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOverview {
    pub kind: SyncKind,
    pub name: String,
    pub helper_window: HelperWindow,
    pub progress: SyncProgress,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    deps: Arc<CoreDependencies>,
    registry: Arc<JobRegistry>,
    events: EventBus,
}

impl CoreService {
    /// Build the job registry from a validated configuration.
    ///
    /// When background sync is enabled, trigger handlers are registered with
    /// the executor and runs left active by a previous process get a fresh
    /// dispatch, since executor schedules do not survive a restart.
    pub async fn bootstrap(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);
        let executor = if config.features.enable_background_sync {
            config.background_executor.clone()
        } else {
            None
        };

        let job_deps = JobDependencies {
            store: Arc::clone(&config.settings_store),
            executor: executor.clone(),
            clock: Arc::clone(&config.clock),
            settings: config.sync.clone(),
            events: Some(events.clone()),
        };
        let progress = ProgressTracker::new(Arc::clone(&config.settings_store));

        let library = BackgroundSync::new(
            LibrarySync::new(
                Arc::clone(&deps.catalog),
                Arc::clone(&deps.syncer),
                progress.clone(),
            ),
            job_deps.clone(),
        );
        let non_library = BackgroundSync::new(
            NonLibrarySync::new(
                Arc::clone(&deps.catalog),
                Arc::clone(&deps.syncer),
                progress,
            ),
            job_deps,
        );

        let mut registry = JobRegistry::new();
        registry.register(SyncKind::Library, Arc::new(library))?;
        registry.register(SyncKind::NonLibrary, Arc::new(non_library))?;

        if let Some(executor) = executor.as_deref() {
            registry.bind_triggers(executor).await?;
            for (kind, control) in registry.iter() {
                if control.is_process_running().await? {
                    info!(kind = %kind, "Re-dispatching a run left active by a previous process");
                    control.dispatch().await?;
                }
            }
        }

        info!(
            jobs = registry.len(),
            background = executor.is_some(),
            "Core service initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            deps: Arc::new(deps),
            registry: Arc::new(registry),
            events,
        })
    }

    /// Access the bridge dependencies being used by the service.
    pub fn dependencies(&self) -> Arc<CoreDependencies> {
        Arc::clone(&self.deps)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to events of every job
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    pub fn job(&self, kind: SyncKind) -> Result<Arc<dyn SyncControl>> {
        Ok(self.registry.get(kind)?)
    }

    /// Start a job. `Ok(false)` means the request was refused or population
    /// failed; the reason is in the job's last run.
    #[instrument(skip(self, options))]
    pub async fn start_sync(&self, kind: SyncKind, options: StartOptions) -> Result<bool> {
        Ok(self.job(kind)?.start(options).await?)
    }

    #[instrument(skip(self))]
    pub async fn stop_sync(&self, kind: SyncKind) -> Result<()> {
        Ok(self.job(kind)?.stop().await?)
    }

    /// Run one window in the calling task, for hosts without an executor
    pub async fn run_window(&self, kind: SyncKind) -> Result<WindowReport> {
        Ok(self.job(kind)?.run_window().await?)
    }

    pub async fn state(&self, kind: SyncKind) -> Result<JobState> {
        Ok(self.job(kind)?.state().await?)
    }

    pub async fn sync_progress(&self, kind: SyncKind) -> Result<SyncProgress> {
        Ok(self.job(kind)?.progress().await?)
    }

    pub async fn process_notice(&self, kind: SyncKind) -> Result<Option<String>> {
        Ok(self.job(kind)?.process_notice().await?)
    }

    pub async fn helper_window(&self, kind: SyncKind) -> Result<HelperWindow> {
        Ok(self.job(kind)?.helper_window())
    }

    pub async fn failed_items(&self, kind: SyncKind) -> Result<Vec<String>> {
        Ok(self.job(kind)?.failed_items().await?)
    }

    /// Forget checkpoints and failure ledgers; refused while the job runs
    pub async fn reset_progress(&self, kind: SyncKind) -> Result<()> {
        let control = self.job(kind)?;
        if control.is_process_running().await? {
            warn!(kind = %kind, "Refusing to reset progress of a running job");
            return Err(CoreError::JobRunning { kind });
        }
        Ok(control.reset_progress().await?)
    }

    /// Name, help text and progress of every registered job
    pub async fn overview(&self) -> Result<Vec<JobOverview>> {
        let mut jobs = Vec::with_capacity(self.registry.len());
        for (kind, control) in self.registry.iter() {
            jobs.push(JobOverview {
                kind,
                name: control.name().to_string(),
                helper_window: control.helper_window(),
                progress: control.progress().await?,
            });
        }
        Ok(jobs)
    }
}

/// Convenience bootstrapper for desktop and server hosts.
///
/// Uses the SQLite settings store at `database_path` (or the platform data
/// directory), a Tokio background executor and a local mirror of the upload
/// directory under `bucket_dir`.
///
/// ```ignore
/// use core_service::bootstrap_desktop;
///
/// let core = bootstrap_desktop(catalog, "/srv/bucket", None).await?;
/// core.start_sync(SyncKind::Library, StartOptions::new()).await?;
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    catalog: Arc<dyn MediaCatalog>,
    bucket_dir: impl Into<std::path::PathBuf>,
    database_path: Option<std::path::PathBuf>,
) -> Result<CoreService> {
    use bridge_desktop::{LocalMirrorSyncer, TokioBackgroundExecutor};

    let mut builder = CoreConfig::builder()
        .background_executor(Arc::new(TokioBackgroundExecutor::new()))
        .enable_background_sync(true);
    if let Some(path) = database_path {
        builder = builder.database_path(path);
    }
    let config = builder
        .build()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

    let syncer: Arc<dyn MediaSyncer> = Arc::new(LocalMirrorSyncer::new(bucket_dir));
    CoreService::bootstrap(config, CoreDependencies::new(catalog, syncer)).await
}
