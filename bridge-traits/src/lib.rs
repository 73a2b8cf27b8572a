//! # Host Bridge Traits
//!
//! Host abstraction traits that must be implemented by each environment the
//! sync engine runs in.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync core and host-specific
//! implementations. Each trait represents a capability that the core requires
//! but that must be provided differently per host (hosted CMS, desktop, server).
//!
//! ## Traits
//!
//! ### Persistence
//! - [`SettingsStore`](storage::SettingsStore) - Key-value store holding all durable sync state
//! - [`SettingsStoreExt`](storage::SettingsStoreExt) - Typed serde helpers over the store
//!
//! ### Scheduling
//! - [`BackgroundExecutor`](background::BackgroundExecutor) - Best-effort scheduled trigger
//!
//! ### Media
//! - [`MediaCatalog`](media::MediaCatalog) - Item source provider
//! - [`MediaSyncer`](media::MediaSyncer) - Per-item upload delegate
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core should fail fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! use core_runtime::error::Error;
//!
//! let store = config.settings_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "SettingsStore".to_string(),
//!         message: "No settings store provided. \
//!                  Desktop: enable the desktop-shims feature. \
//!                  Other hosts: inject a native adapter.".to_string()
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type, except
//! [`MediaSyncer`](media::MediaSyncer) which reports a classified
//! [`MediaError`](media::MediaError) so the engine can decide between
//! stopping and skipping.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod background;
pub mod error;
pub mod media;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{BackgroundExecutor, TaskHandler, TaskId, TaskStatus};
pub use media::{MediaAttachment, MediaCatalog, MediaError, MediaSyncer};
pub use storage::{SettingsStore, SettingsStoreExt};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
