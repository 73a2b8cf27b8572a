//! # Background Sync Controller
//!
//! Drives one job through start, bounded execution windows and completion.
//!
//! ## Overview
//!
//! [`BackgroundSync`] owns the job identity and all of its persisted state.
//! A concrete job only implements [`SyncJob`]: where items come from, what to
//! do with one item and how to describe itself.
//!
//! ```text
//! start() ──> items() ──> queue segments ──> dispatch()
//!                                              │
//!            ┌─────────────────────────────────┘
//!            v
//!      run_window() ── lock ── peek ── task(item) ── ack ── heartbeat
//!            │                  ^                              │
//!            │                  └──────── budget left ─────────┘
//!            ├── budget used / yield / retry ──> dispatch() again
//!            ├── queue empty ──> extend_queue() ──> complete()
//!            └── Fatal / Unclassified ──> stop()
//! ```
//!
//! Every window re-reads the persisted state, so the controller survives
//! process restarts between windows. An item leaves the queue only after its
//! task reached a terminal outcome.

use async_trait::async_trait;
use bridge_traits::{BackgroundExecutor, Clock, SettingsStore, SettingsStoreExt};
use core_runtime::config::SyncSettings;
use core_runtime::events::{EventBus, SyncEvent};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::{Dispatcher, WindowGuard};
use crate::error::{Result, TaskError};
use crate::job::{
    HelperWindow, JobState, LastRun, ProcessMeta, RunOutcome, StartOptions, SyncProgress,
    TaskContext, TaskOutcome, WindowExit, WindowReport,
};
use crate::queue::QueueStore;

/// Warning shown when a run made no progress for a whole health-check period
pub const STUCK_PROCESS_NOTICE: &str = "This process takes longer than it should. \
Please, make sure the background scheduler is enabled and working, or try restarting the process.";

// ============================================================================
// Job Contract
// ============================================================================

/// What a concrete background job supplies
#[async_trait]
pub trait SyncJob: Send + Sync + 'static {
    /// Queued work item; persisted as JSON in queue segments
    type Item: Serialize + DeserializeOwned + Display + Clone + Send + Sync + 'static;

    /// Unique action name, used as the namespace of every persisted key
    fn action(&self) -> &str;

    /// Human-readable job name
    fn name(&self) -> &str;

    fn helper_window(&self) -> HelperWindow;

    /// Job-specific health-check period, overriding the global setting
    fn cron_interval_minutes(&self) -> Option<u64> {
        None
    }

    /// Full ordered list of items for a new run
    async fn items(&self, options: &StartOptions) -> Result<Vec<Self::Item>>;

    /// Process one item
    async fn task(
        &self,
        item: &Self::Item,
        ctx: &TaskContext,
    ) -> std::result::Result<TaskOutcome, TaskError>;

    /// More items once the queue ran dry; an empty list completes the run
    async fn extend_queue(&self, _ctx: &TaskContext) -> Result<Vec<Self::Item>> {
        Ok(Vec::new())
    }

    /// Items that ended as unprocessable and were not fixed since
    async fn failed_items(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Forget checkpoints and failure records
    async fn reset_progress(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared collaborators of every controller
#[derive(Clone)]
pub struct JobDependencies {
    pub store: Arc<dyn SettingsStore>,
    pub executor: Option<Arc<dyn BackgroundExecutor>>,
    pub clock: Arc<dyn Clock>,
    pub settings: SyncSettings,
    pub events: Option<EventBus>,
}

// ============================================================================
// Controller
// ============================================================================

/// Persistent, resumable controller for one [`SyncJob`]
pub struct BackgroundSync<J: SyncJob> {
    job: Arc<J>,
    store: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    dispatcher: Dispatcher,
    events: Option<EventBus>,
    /// Held from the state check in `start` until the queue is populated
    starting: Mutex<()>,
}

impl<J: SyncJob> BackgroundSync<J> {
    pub fn new(job: J, deps: JobDependencies) -> Self {
        let mut dispatcher = Dispatcher::new(
            job.action(),
            Arc::clone(&deps.store),
            deps.executor,
            Arc::clone(&deps.clock),
            deps.settings.clone(),
        );
        if let Some(minutes) = job.cron_interval_minutes() {
            dispatcher = dispatcher.with_cron_interval_minutes(minutes);
        }

        Self {
            job: Arc::new(job),
            store: deps.store,
            clock: deps.clock,
            settings: deps.settings,
            dispatcher,
            events: deps.events,
            starting: Mutex::new(()),
        }
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn action(&self) -> &str {
        self.job.action()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.job.action(), suffix)
    }

    fn meta_key(&self) -> String {
        self.key("process_meta")
    }

    fn stopped_key(&self) -> String {
        self.key("stopped")
    }

    fn last_run_key(&self) -> String {
        self.key("last_run")
    }

    /// Queue of this job
    pub fn queue(&self) -> QueueStore<J::Item> {
        QueueStore::new(Arc::clone(&self.store), self.job.action())
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            // No subscriber is fine
            let _ = events.emit(event);
        }
    }

    // ------------------------------------------------------------------------
    // Persisted state
    // ------------------------------------------------------------------------

    pub async fn process_meta(&self) -> Result<Option<ProcessMeta>> {
        Ok(self.store.get_as::<ProcessMeta>(&self.meta_key()).await?)
    }

    async fn save_meta(&self, meta: &ProcessMeta) -> Result<()> {
        self.store.set_as(&self.meta_key(), meta).await?;
        Ok(())
    }

    pub async fn last_run(&self) -> Result<Option<LastRun>> {
        Ok(self.store.get_as::<LastRun>(&self.last_run_key()).await?)
    }

    pub async fn is_stop_requested(&self) -> Result<bool> {
        Ok(self
            .store
            .get_as::<bool>(&self.stopped_key())
            .await?
            .unwrap_or(false))
    }

    /// A run is active and no stop was requested
    pub async fn is_process_running(&self) -> Result<bool> {
        if self.is_stop_requested().await? {
            return Ok(false);
        }
        Ok(self.process_meta().await?.is_some())
    }

    /// Lifecycle state derived from the persisted keys
    pub async fn state(&self) -> Result<JobState> {
        if self.is_stop_requested().await? {
            if self.dispatcher.is_locked().await? {
                return Ok(JobState::Stopping);
            }
            return Ok(JobState::Stopped);
        }

        if self.process_meta().await?.is_some() {
            return Ok(JobState::Running);
        }

        Ok(match self.last_run().await? {
            Some(run) if run.outcome == RunOutcome::Completed => JobState::Completed,
            Some(_) => JobState::Stopped,
            None => JobState::Idle,
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start a new run.
    ///
    /// Returns `false` when a run is already active or the queue could not
    /// be populated; the latter also stops the job.
    #[instrument(skip(self), fields(action = %self.job.action()))]
    pub async fn start(&self, options: StartOptions) -> Result<bool> {
        let _starting = self.starting.lock().await;
        let state = self.state().await?;
        if !state.can_transition_to(JobState::Running) {
            info!(state = %state, "Process is already running");
            return Ok(false);
        }

        match self.populate(&options).await {
            Ok(None) => {
                info!("Stop requested while the queue was being built");
                Ok(false)
            }
            Ok(Some(total)) => {
                info!(total, "Started");
                self.emit(SyncEvent::Started {
                    action: self.job.action().to_string(),
                    total,
                });
                Ok(true)
            }
            Err(err) => {
                error!("Could not start the process due to the error: {}", err);
                self.stop_with_reason(Some(err.to_string())).await?;
                Ok(false)
            }
        }
    }

    /// Build the queue and metadata of a new run.
    ///
    /// Returns `None` when a stop arrived from elsewhere while the items were
    /// collected; the partial run is then discarded.
    async fn populate(&self, options: &StartOptions) -> Result<Option<u64>> {
        self.store.delete(&self.stopped_key()).await?;
        self.store.delete(&self.meta_key()).await?;
        self.queue().clear().await?;

        let items = self.job.items(options).await?;
        let total = self.enqueue(items).await?;

        // Metadata goes in before the first trigger can fire.
        let meta = ProcessMeta::new(self.clock.unix_timestamp(), total, options.clone());
        self.save_meta(&meta).await?;

        if self.is_stop_requested().await? {
            self.queue().clear().await?;
            self.store.delete(&self.meta_key()).await?;
            return Ok(None);
        }

        self.dispatcher.dispatch().await?;
        Ok(Some(total))
    }

    /// Persist items as segments of at most `max_batch_size`
    async fn enqueue(&self, items: Vec<J::Item>) -> Result<u64> {
        let total = items.len() as u64;
        let batch_size = self.settings.max_batch_size.max(1);
        let mut queue = self.queue();

        for chunk in items.chunks(batch_size) {
            for item in chunk {
                queue.push(item.clone());
            }
            queue.save().await?;
        }
        Ok(total)
    }

    /// Request a window through the scheduled trigger
    pub async fn dispatch(&self) -> Result<()> {
        self.dispatcher.dispatch().await
    }

    /// Operator stop
    #[instrument(skip(self), fields(action = %self.job.action()))]
    pub async fn stop(&self) -> Result<()> {
        let _starting = self.starting.lock().await;
        self.stop_with_reason(None).await
    }

    async fn stop_with_reason(&self, reason: Option<String>) -> Result<()> {
        let meta = self.process_meta().await?;
        let already_stopped = self.is_stop_requested().await?;

        self.store.set_as(&self.stopped_key(), &true).await?;
        self.queue().clear().await?;
        self.store.delete(&self.meta_key()).await?;
        self.dispatcher.clear_scheduled().await?;

        if meta.is_some() || !already_stopped {
            let now = self.clock.unix_timestamp();
            let run = LastRun::from_meta(meta.as_ref(), RunOutcome::Stopped, now, reason.clone());
            self.store.set_as(&self.last_run_key(), &run).await?;

            match &reason {
                Some(reason) => error!(processed = run.processed, "Stopped due to error - {}", reason),
                None => info!(processed = run.processed, "Stopped"),
            }
            self.emit(SyncEvent::Stopped {
                action: self.job.action().to_string(),
                processed: run.processed,
                reason,
            });
        }
        Ok(())
    }

    async fn complete(&self, meta: &ProcessMeta) -> Result<()> {
        self.queue().clear().await?;
        self.store.delete(&self.meta_key()).await?;
        self.dispatcher.clear_scheduled().await?;

        let now = self.clock.unix_timestamp();
        let run = LastRun::from_meta(Some(meta), RunOutcome::Completed, now, None);
        self.store.set_as(&self.last_run_key(), &run).await?;

        let duration_secs = now.saturating_sub(meta.starttime).max(0) as u64;
        info!(
            processed = meta.processed,
            failed = meta.failed,
            duration_secs,
            "Complete"
        );
        self.emit(SyncEvent::Completed {
            action: self.job.action().to_string(),
            processed: meta.processed,
            duration_secs,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Execution window
    // ------------------------------------------------------------------------

    /// Run one bounded execution window.
    ///
    /// Safe to call from overlapping triggers: a window that cannot take the
    /// process lock returns [`WindowExit::Busy`] without touching the queue.
    #[instrument(skip(self), fields(action = %self.job.action()))]
    pub async fn run_window(&self) -> Result<WindowReport> {
        let Some(guard) = self.dispatcher.try_acquire().await? else {
            debug!("Another window is running");
            return Ok(WindowReport::new(WindowExit::Busy));
        };

        let result = self.drive_window(&guard).await;
        if let Err(err) = guard.release().await {
            warn!(error = %err, "Could not release process lock");
        }
        let report = result?;

        if report.exit.needs_followup() {
            if let Err(err) = self.dispatcher.dispatch().await {
                warn!(error = %err, "Could not request the next window");
            }
        }

        debug!(
            exit = ?report.exit,
            processed = report.processed,
            failed = report.failed,
            "Window finished"
        );
        Ok(report)
    }

    /// Trigger entry point; never fails
    pub async fn handle_trigger(&self) {
        if let Err(err) = self.run_window().await {
            error!(action = %self.job.action(), error = %err, "Execution window failed");
        }
    }

    async fn drive_window(&self, guard: &WindowGuard) -> Result<WindowReport> {
        let Some(mut meta) = self.process_meta().await? else {
            return Ok(WindowReport::new(WindowExit::NotRunning));
        };
        if self.is_stop_requested().await? {
            return Ok(WindowReport::new(WindowExit::Stopped));
        }

        let ctx = TaskContext {
            action: self.job.action().to_string(),
            run_id: meta.run_id,
            options: meta.options.clone(),
        };
        let queue = self.queue();
        let mut budget = self.dispatcher.budget();
        let mut report = WindowReport::new(WindowExit::Drained);

        loop {
            let Some(entry) = queue.peek().await? else {
                let extension = match self.job.extend_queue(&ctx).await {
                    Ok(items) => items,
                    Err(err) => {
                        self.stop_with_reason(Some(err.to_string())).await?;
                        report.exit = WindowExit::Stopped;
                        report.error = Some(TaskError::from(err));
                        return Ok(report);
                    }
                };

                if extension.is_empty() {
                    self.complete(&meta).await?;
                    report.exit = WindowExit::Drained;
                    return Ok(report);
                }

                meta.total += self.enqueue(extension).await?;
                if !self.checkpoint(&meta).await? {
                    report.exit = WindowExit::Stopped;
                    return Ok(report);
                }
                continue;
            };

            let outcome = self.execute(&entry.item, &ctx).await;

            // The lock may have expired while the task ran; the queue then
            // belongs to whoever took it over.
            if !guard.extend().await? {
                warn!(item = %entry.item, "Process lock was taken over; abandoning the window");
                report.exit = WindowExit::Busy;
                return Ok(report);
            }
            let now = self.clock.unix_timestamp();

            match outcome {
                Ok(TaskOutcome::Retry) => {
                    debug!(item = %entry.item, "Item will be retried");
                    meta.last_at = Some(now);
                    report.exit = WindowExit::Paused;
                    if !self.checkpoint(&meta).await? {
                        report.exit = WindowExit::Stopped;
                    }
                    return Ok(report);
                }
                Ok(outcome) => {
                    queue.ack(&entry).await?;
                    meta.processed += 1;
                    meta.last_at = Some(now);
                    report.processed += 1;
                    budget.record();

                    if !self.checkpoint(&meta).await? {
                        report.exit = WindowExit::Stopped;
                        return Ok(report);
                    }
                    self.emit(SyncEvent::Progress {
                        action: self.job.action().to_string(),
                        processed: meta.processed,
                        total: meta.total,
                        percent: meta.percent(),
                    });

                    if outcome == TaskOutcome::Yield {
                        report.exit = WindowExit::Paused;
                        return Ok(report);
                    }
                }
                Err(err) if !err.stops_job() => {
                    warn!(item = %entry.item, error = %err, "Skipping unprocessable item");
                    queue.ack(&entry).await?;
                    meta.failed += 1;
                    meta.last_at = Some(now);
                    meta.last_error = Some(err.to_string());
                    report.failed += 1;
                    budget.record();

                    if !self.checkpoint(&meta).await? {
                        report.exit = WindowExit::Stopped;
                        return Ok(report);
                    }
                    self.emit(SyncEvent::ItemSkipped {
                        action: self.job.action().to_string(),
                        item: entry.item.to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(item = %entry.item, kind = %err.kind(), "Item failed; stopping the job");
                    self.stop_with_reason(Some(err.to_string())).await?;
                    report.exit = WindowExit::Stopped;
                    report.error = Some(err);
                    return Ok(report);
                }
            }

            if budget.exhausted(self.clock.as_ref()) {
                report.exit = WindowExit::BudgetExhausted;
                return Ok(report);
            }
        }
    }

    /// Run the task, turning a panic into an unclassified failure
    async fn execute(
        &self,
        item: &J::Item,
        ctx: &TaskContext,
    ) -> std::result::Result<TaskOutcome, TaskError> {
        match AssertUnwindSafe(self.job.task(item, ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(TaskError::Unclassified(format!(
                "Task panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Persist the heartbeat unless a stop arrived meanwhile
    async fn checkpoint(&self, meta: &ProcessMeta) -> Result<bool> {
        if self.is_stop_requested().await? {
            debug!("Stop requested during the window");
            return Ok(false);
        }
        self.save_meta(meta).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Operator views
    // ------------------------------------------------------------------------

    /// Warning for a run that made no progress within one health-check period
    pub async fn get_process_notice(&self) -> Result<Option<String>> {
        if self.is_stop_requested().await? {
            return Ok(None);
        }
        let Some(meta) = self.process_meta().await? else {
            return Ok(None);
        };
        if meta.processed > 0 {
            return Ok(None);
        }

        let silent_for = self.clock.unix_timestamp() - meta.last_activity();
        let threshold = (self.dispatcher.cron_interval_minutes() * 60) as i64;
        if silent_for >= threshold {
            Ok(Some(STUCK_PROCESS_NOTICE.to_string()))
        } else {
            Ok(None)
        }
    }

    pub async fn progress(&self) -> Result<SyncProgress> {
        let state = self.state().await?;
        let queued = self.queue().len().await?;
        let notice = self.get_process_notice().await?;

        let mut progress = SyncProgress {
            action: self.job.action().to_string(),
            name: self.job.name().to_string(),
            state,
            processed: 0,
            failed: 0,
            total: 0,
            queued,
            percent: 0,
            started_at: None,
            last_at: None,
            last_error: None,
            notice,
        };

        if let Some(meta) = self.process_meta().await? {
            progress.processed = meta.processed;
            progress.failed = meta.failed;
            progress.total = meta.total;
            progress.percent = meta.percent();
            progress.started_at = Some(meta.starttime);
            progress.last_at = meta.last_at;
            progress.last_error = meta.last_error;
        } else if let Some(run) = self.last_run().await? {
            progress.processed = run.processed;
            progress.failed = run.failed;
            progress.total = run.total;
            progress.percent = match run.outcome {
                RunOutcome::Completed => 100,
                RunOutcome::Stopped if run.total > 0 => {
                    (((run.processed + run.failed).min(run.total) * 100) / run.total) as u8
                }
                RunOutcome::Stopped => 0,
            };
            progress.started_at = run.started_at;
            progress.last_at = Some(run.finished_at);
            progress.last_error = run.error;
        }

        Ok(progress)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
