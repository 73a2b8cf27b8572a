//! Concrete background sync jobs

mod library;
mod non_library;

pub use library::{LibrarySync, LIBRARY_ACTION};
pub use non_library::{NonLibrarySync, NON_LIBRARY_ACTION};
