//! # Core Configuration Module
//!
//! Provides configuration management for the background sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary dependencies and settings for the engine.
//! It enforces fail-fast validation to ensure all required bridges are provided
//! before initialization.
//!
//! ## Required Dependencies
//!
//! - `SettingsStore` - Required for queue segments, process metadata and checkpoints
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `BackgroundExecutor` - Scheduled trigger (required when background sync is enabled)
//! - `Clock` - Time source (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, a SQLite-backed `SettingsStore`
//! is injected automatically if none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncSettings};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/stateless-sync/sync.db")
//!     .sync_settings(
//!         SyncSettings::default()
//!             .with_max_batch_size(50)
//!             .with_window_time_limit(Duration::from_secs(25)),
//!     )
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! The builder validates all required dependencies and provides actionable error
//! messages when capabilities are missing.

use crate::error::{Error, Result};
use bridge_traits::{BackgroundExecutor, Clock, SettingsStore, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default number of items persisted per queue segment
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default health-check period in minutes
pub const DEFAULT_CRON_INTERVAL_MINUTES: u64 = 5;

/// Default wall-clock budget of one execution window
pub const DEFAULT_WINDOW_TIME_LIMIT: Duration = Duration::from_secs(20);

/// Default lifetime of the persisted process lock
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

/// Default event bus capacity
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Tuning knobs shared by every sync job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Items per persisted queue segment
    pub max_batch_size: usize,

    /// Period of the health-check trigger, also the threshold for the
    /// "process takes longer than it should" notice
    pub cron_interval_minutes: u64,

    /// Wall-clock budget of one execution window
    pub window_time_limit: Duration,

    /// Optional cap on items handled per window
    pub window_max_items: Option<usize>,

    /// How long a persisted process lock is honoured before it is
    /// considered abandoned
    pub lock_duration: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            cron_interval_minutes: DEFAULT_CRON_INTERVAL_MINUTES,
            window_time_limit: DEFAULT_WINDOW_TIME_LIMIT,
            window_max_items: None,
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }
}

impl SyncSettings {
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_cron_interval_minutes(mut self, minutes: u64) -> Self {
        self.cron_interval_minutes = minutes;
        self
    }

    pub fn with_window_time_limit(mut self, limit: Duration) -> Self {
        self.window_time_limit = limit;
        self
    }

    pub fn with_window_max_items(mut self, max_items: usize) -> Self {
        self.window_max_items = Some(max_items);
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    /// Health-check period as a `Duration`
    pub fn cron_interval(&self) -> Duration {
        Duration::from_secs(self.cron_interval_minutes * 60)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Config(
                "Max batch size must be greater than 0".to_string(),
            ));
        }

        if self.cron_interval_minutes == 0 {
            return Err(Error::Config(
                "Cron interval must be at least 1 minute".to_string(),
            ));
        }

        if self.window_time_limit.is_zero() {
            return Err(Error::Config(
                "Window time limit must be greater than 0".to_string(),
            ));
        }

        if self.window_max_items == Some(0) {
            return Err(Error::Config(
                "Window max items must be greater than 0 when set".to_string(),
            ));
        }

        if self.lock_duration < self.window_time_limit {
            return Err(Error::Config(
                "Lock duration must be at least the window time limit, \
                 otherwise overlapping windows can take over a live lock"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Drive execution windows from the `BackgroundExecutor` (requires one)
    pub enable_background_sync: bool,
}

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path of the SQLite settings database used by the desktop default store
    pub database_path: Option<PathBuf>,

    /// Durable key/value store (required)
    pub settings_store: Arc<dyn SettingsStore>,

    /// Scheduled trigger (optional)
    pub background_executor: Option<Arc<dyn BackgroundExecutor>>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Engine tuning
    pub sync: SyncSettings,

    /// Features flags
    pub features: FeatureFlags,

    /// Capacity of the event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "background_executor",
                &self
                    .background_executor
                    .as_ref()
                    .map(|_| "BackgroundExecutor { ... }"),
            )
            .field("sync", &self.sync)
            .field("features", &self.features)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Sync settings are in range
    /// - Event buffer is not empty
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.features.enable_background_sync && self.background_executor.is_none() {
            return Err(Error::Config(
                "Background sync enabled but no BackgroundExecutor provided. \
                 Disable the feature or inject a BackgroundExecutor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required for queue and progress persistence. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default SqliteSettingsStore. \
                 Other hosts: inject a store backed by the host's option table."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(database_path: Option<&PathBuf>) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let candidate = database_path
        .cloned()
        .unwrap_or_else(|| bridge_desktop::default_data_dir().join("sync.db"));

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default settings store: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // A runtime cannot be blocked on from inside another one.
    let store = match Handle::try_current() {
        Ok(_) => {
            let path = candidate.clone();
            thread::spawn(move || init_store(path))
                .join()
                .map_err(|_| {
                    Error::Internal(
                        "Worker thread panicked while creating default SettingsStore".to_string(),
                    )
                })??
        }
        Err(_) => init_store(candidate)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(
    _database_path: Option<&PathBuf>,
) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    background_executor: Option<Arc<dyn BackgroundExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    sync: Option<SyncSettings>,
    features: FeatureFlags,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the path of the SQLite database used when no store is injected.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/var/lib/stateless-sync/sync.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the settings store implementation (required).
    ///
    /// Every piece of durable sync state lives in this store.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Sets the background executor implementation (optional).
    pub fn background_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.background_executor = Some(executor);
        self
    }

    /// Sets the time source. Default: [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets engine tuning. Default: [`SyncSettings::default`].
    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    /// Enables or disables background sync.
    ///
    /// Requires a `BackgroundExecutor` to be provided.
    ///
    /// Default: false
    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    /// Sets the event bus capacity.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if:
    /// - No `SettingsStore` is available
    /// - Sync settings are out of range
    /// - Feature flags are inconsistent with available bridges
    pub fn build(self) -> Result<CoreConfig> {
        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(self.database_path.as_ref())?,
        };

        let config = CoreConfig {
            database_path: self.database_path,
            settings_store,
            background_executor: self.background_executor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync.unwrap_or_default(),
            features: self.features,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
