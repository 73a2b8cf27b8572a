//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the background sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management and engine tuning
//! - Sync event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other core crate depends on.
//! It establishes the logging conventions, the configuration builder with its
//! fail-fast capability checks, and the broadcast channel jobs report through.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, FeatureFlags, SyncSettings};
pub use error::{Error, Result};
pub use events::{EventBus, EventStream, SyncEvent};
