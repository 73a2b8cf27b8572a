//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides ready-to-use implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `SettingsStore` using a SQLite-backed key-value store (`sqlx`)
//! - `SettingsStore` in memory for tests and ephemeral hosts
//! - `BackgroundExecutor` using spawned Tokio tasks and timers
//! - `MediaSyncer` mirroring files into a local bucket directory
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{SqliteSettingsStore, TokioBackgroundExecutor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = SqliteSettingsStore::new("sync.db".into()).await.unwrap();
//!     let executor = TokioBackgroundExecutor::new();
//!
//!     // Use in core configuration
//! }
//! ```

mod background;
mod mirror;
mod settings;

pub use background::TokioBackgroundExecutor;
pub use mirror::{default_data_dir, LocalMirrorSyncer};
pub use settings::{MemorySettingsStore, SqliteSettingsStore};
