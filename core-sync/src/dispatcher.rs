//! # Dispatcher
//!
//! Hands control to the scheduled trigger and bounds each execution window.
//!
//! ## Triggers
//!
//! Every job owns two trigger ids on the [`BackgroundExecutor`]:
//!
//! - `{action}_dispatch`: one-shot, requested whenever a window should run
//!   "as soon as possible" (after `start()`, after a window ran out of budget)
//! - `{action}_cron`: recurring health check at the configured cron interval,
//!   which keeps a run alive when one-shot triggers get lost
//!
//! Neither is guaranteed to fire. Without an executor both are no-ops and
//! the host drives windows by calling `run_window()` directly.
//!
//! ## Reentrancy
//!
//! Triggers may overlap. A window only runs after acquiring a
//! [`WindowGuard`], which combines an in-process `tokio::sync::Mutex` with a
//! persisted `{action}_process_lock` record. The persisted record expires
//! after `lock_duration` so that a crashed window does not block the job
//! forever.

use bridge_traits::{BackgroundExecutor, Clock, SettingsStore, SettingsStoreExt, TaskId};
use core_runtime::config::SyncSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Persisted reentrancy lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLock {
    pub holder: Uuid,
    /// Unix milliseconds after which the lock is considered abandoned
    pub expires_at: i64,
}

/// Exclusive right to run one execution window
pub struct WindowGuard {
    _local: OwnedMutexGuard<()>,
    holder: Uuid,
    key: String,
    store: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    lock_millis: i64,
}

impl WindowGuard {
    pub fn holder(&self) -> Uuid {
        self.holder
    }

    /// Push the lock expiry one `lock_duration` past now.
    ///
    /// Returns `false` when the persisted lock is no longer ours: it expired
    /// and another window took it over.
    pub async fn extend(&self) -> Result<bool> {
        let current = self.store.get_as::<ProcessLock>(&self.key).await?;
        if current.map_or(true, |lock| lock.holder != self.holder) {
            return Ok(false);
        }

        let renewed = ProcessLock {
            holder: self.holder,
            expires_at: self
                .clock
                .unix_timestamp_millis()
                .saturating_add(self.lock_millis),
        };
        self.store.set_as(&self.key, &renewed).await?;
        Ok(true)
    }

    /// Drop the persisted lock if it is still ours
    pub async fn release(self) -> Result<()> {
        let current = self.store.get_as::<ProcessLock>(&self.key).await?;
        if current.map_or(false, |lock| lock.holder == self.holder) {
            self.store.delete(&self.key).await?;
        }
        Ok(())
    }
}

/// Item and wall-clock budget of one window
#[derive(Debug, Clone)]
pub struct WindowBudget {
    deadline: i64,
    max_items: Option<usize>,
    handled: usize,
}

impl WindowBudget {
    pub fn new(clock: &dyn Clock, time_limit: Duration, max_items: Option<usize>) -> Self {
        let limit = time_limit.as_millis().min(i64::MAX as u128) as i64;
        Self {
            deadline: clock.unix_timestamp_millis().saturating_add(limit),
            max_items,
            handled: 0,
        }
    }

    /// Count one item that reached a terminal outcome
    pub fn record(&mut self) {
        self.handled += 1;
    }

    pub fn handled(&self) -> usize {
        self.handled
    }

    pub fn exhausted(&self, clock: &dyn Clock) -> bool {
        if self.max_items.map_or(false, |max| self.handled >= max) {
            return true;
        }
        clock.unix_timestamp_millis() >= self.deadline
    }
}

/// Trigger scheduling and window admission for one job
pub struct Dispatcher {
    action: String,
    store: Arc<dyn SettingsStore>,
    executor: Option<Arc<dyn BackgroundExecutor>>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    cron_interval_minutes: u64,
    in_process: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(
        action: impl Into<String>,
        store: Arc<dyn SettingsStore>,
        executor: Option<Arc<dyn BackgroundExecutor>>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        let cron_interval_minutes = settings.cron_interval_minutes;
        Self {
            action: action.into(),
            store,
            executor,
            clock,
            settings,
            cron_interval_minutes,
            in_process: Arc::new(Mutex::new(())),
        }
    }

    /// Use a job-specific health-check period instead of the global one
    pub fn with_cron_interval_minutes(mut self, minutes: u64) -> Self {
        if minutes > 0 {
            self.cron_interval_minutes = minutes;
        }
        self
    }

    pub fn cron_interval_minutes(&self) -> u64 {
        self.cron_interval_minutes
    }

    pub fn cron_interval(&self) -> Duration {
        Duration::from_secs(self.cron_interval_minutes * 60)
    }

    pub fn dispatch_task_id(&self) -> String {
        format!("{}_dispatch", self.action)
    }

    pub fn healthcheck_task_id(&self) -> String {
        format!("{}_cron", self.action)
    }

    fn lock_key(&self) -> String {
        format!("{}_process_lock", self.action)
    }

    /// Ask the trigger for a window as soon as possible, and make sure the
    /// health check is scheduled.
    pub async fn dispatch(&self) -> Result<()> {
        let Some(executor) = &self.executor else {
            debug!(action = %self.action, "No background executor; windows run on demand");
            return Ok(());
        };

        executor
            .schedule_once(&self.dispatch_task_id(), Duration::ZERO)
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;
        self.schedule_healthcheck().await
    }

    /// Schedule the recurring health check unless it already is
    pub async fn schedule_healthcheck(&self) -> Result<()> {
        let Some(executor) = &self.executor else {
            return Ok(());
        };

        let id = TaskId::new(self.healthcheck_task_id());
        let scheduled = executor
            .list_tasks()
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?
            .contains(&id);
        if scheduled {
            return Ok(());
        }

        executor
            .schedule_task(id.as_str(), self.cron_interval())
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;
        debug!(
            action = %self.action,
            minutes = self.cron_interval_minutes,
            "Scheduled health check"
        );
        Ok(())
    }

    /// Cancel both triggers
    pub async fn clear_scheduled(&self) -> Result<()> {
        let Some(executor) = &self.executor else {
            return Ok(());
        };

        for id in [self.healthcheck_task_id(), self.dispatch_task_id()] {
            if let Err(err) = executor.cancel_task(&TaskId::new(id.clone())).await {
                warn!(action = %self.action, task_id = %id, error = %err, "Could not cancel trigger");
            }
        }
        Ok(())
    }

    /// Try to become the only window of this job.
    ///
    /// Returns `None` when another window holds either lock.
    pub async fn try_acquire(&self) -> Result<Option<WindowGuard>> {
        let Ok(local) = Arc::clone(&self.in_process).try_lock_owned() else {
            return Ok(None);
        };

        let key = self.lock_key();
        let now = self.clock.unix_timestamp_millis();
        if let Some(lock) = self.store.get_as::<ProcessLock>(&key).await? {
            if lock.expires_at > now {
                debug!(action = %self.action, holder = %lock.holder, "Process lock is held");
                return Ok(None);
            }
            warn!(action = %self.action, holder = %lock.holder, "Taking over an expired process lock");
        }

        let lock_millis = self.lock_millis();
        let ours = ProcessLock {
            holder: Uuid::new_v4(),
            expires_at: now.saturating_add(lock_millis),
        };
        self.store.set_as(&key, &ours).await?;

        // Another process may have written in between; the last writer wins.
        let confirmed = self.store.get_as::<ProcessLock>(&key).await?;
        if confirmed.as_ref().map(|lock| lock.holder) != Some(ours.holder) {
            return Ok(None);
        }

        Ok(Some(WindowGuard {
            _local: local,
            holder: ours.holder,
            key,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            lock_millis,
        }))
    }

    fn lock_millis(&self) -> i64 {
        self.settings.lock_duration.as_millis().min(i64::MAX as u128) as i64
    }

    /// True while an unexpired persisted lock exists
    pub async fn is_locked(&self) -> Result<bool> {
        let now = self.clock.unix_timestamp_millis();
        Ok(self
            .store
            .get_as::<ProcessLock>(&self.lock_key())
            .await?
            .map_or(false, |lock| lock.expires_at > now))
    }

    /// Budget for a window starting now
    pub fn budget(&self) -> WindowBudget {
        WindowBudget::new(
            self.clock.as_ref(),
            self.settings.window_time_limit,
            self.settings.window_max_items,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::MemorySettingsStore;
    use bridge_traits::ManualClock;

    fn dispatcher(clock: Arc<ManualClock>, settings: SyncSettings) -> Dispatcher {
        Dispatcher::new(
            "bg_test",
            Arc::new(MemorySettingsStore::new()),
            None,
            clock,
            settings,
        )
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let dispatcher = dispatcher(clock, SyncSettings::default());

        let guard = dispatcher.try_acquire().await.unwrap().unwrap();
        assert!(dispatcher.try_acquire().await.unwrap().is_none());
        assert!(dispatcher.is_locked().await.unwrap());

        guard.release().await.unwrap();
        assert!(!dispatcher.is_locked().await.unwrap());
        assert!(dispatcher.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persisted_lock_blocks_other_process() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        let settings = SyncSettings::default();
        let first = Dispatcher::new("bg_test", store.clone(), None, clock.clone(), settings.clone());
        let second = Dispatcher::new("bg_test", store, None, clock.clone(), settings);

        let _guard = first.try_acquire().await.unwrap().unwrap();
        assert!(second.try_acquire().await.unwrap().is_none());

        clock.advance(Duration::from_secs(61));
        assert!(second.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_keeps_foreign_lock() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        let settings = SyncSettings::default();
        let first = Dispatcher::new("bg_test", store.clone(), None, clock.clone(), settings.clone());
        let second = Dispatcher::new("bg_test", store, None, clock.clone(), settings);

        let stale = first.try_acquire().await.unwrap().unwrap();
        clock.advance(Duration::from_secs(120));
        let _fresh = second.try_acquire().await.unwrap().unwrap();

        stale.release().await.unwrap();
        assert!(second.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_keeps_lock_alive_across_long_windows() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        let settings = SyncSettings::default();
        let first = Dispatcher::new("bg_test", store.clone(), None, clock.clone(), settings.clone());
        let second = Dispatcher::new("bg_test", store, None, clock.clone(), settings);

        let guard = first.try_acquire().await.unwrap().unwrap();
        clock.advance(Duration::from_secs(45));
        assert!(guard.extend().await.unwrap());
        clock.advance(Duration::from_secs(45));
        assert!(second.try_acquire().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extend_reports_lost_lock() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        let settings = SyncSettings::default();
        let first = Dispatcher::new("bg_test", store.clone(), None, clock.clone(), settings.clone());
        let second = Dispatcher::new("bg_test", store, None, clock.clone(), settings);

        let stale = first.try_acquire().await.unwrap().unwrap();
        clock.advance(Duration::from_secs(61));
        let fresh = second.try_acquire().await.unwrap().unwrap();

        assert!(!stale.extend().await.unwrap());
        assert!(fresh.extend().await.unwrap());
    }

    #[test]
    fn test_budget_by_items_and_time() {
        let clock = ManualClock::at_unix(1_000);
        let mut budget = WindowBudget::new(&clock, Duration::from_secs(20), Some(2));
        assert!(!budget.exhausted(&clock));
        budget.record();
        assert!(!budget.exhausted(&clock));
        budget.record();
        assert!(budget.exhausted(&clock));

        let budget = WindowBudget::new(&clock, Duration::from_secs(20), None);
        clock.advance(Duration::from_secs(19));
        assert!(!budget.exhausted(&clock));
        clock.advance(Duration::from_secs(1));
        assert!(budget.exhausted(&clock));
    }

    #[test]
    fn test_job_cron_interval_override() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let dispatcher = dispatcher(clock, SyncSettings::default().with_cron_interval_minutes(10))
            .with_cron_interval_minutes(5);
        assert_eq!(dispatcher.cron_interval(), Duration::from_secs(300));
        assert_eq!(dispatcher.healthcheck_task_id(), "bg_test_cron");
        assert_eq!(dispatcher.dispatch_task_id(), "bg_test_dispatch");
    }

    #[tokio::test]
    async fn test_dispatch_without_executor_is_noop() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let dispatcher = dispatcher(clock, SyncSettings::default());
        dispatcher.dispatch().await.unwrap();
        dispatcher.clear_scheduled().await.unwrap();
    }
}
