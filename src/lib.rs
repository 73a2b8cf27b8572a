//! Workspace entry crate.
//!
//! Re-exports the service façade so host applications can depend on
//! `stateless-sync` and enable the documented features without wiring each
//! workspace crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
