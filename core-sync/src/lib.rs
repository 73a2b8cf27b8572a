//! # Background Sync Engine
//!
//! Persistent, resumable batch processing of media items towards remote
//! storage, driven by an unreliable scheduled trigger.
//!
//! ## Overview
//!
//! A job enumerates its items once at start, persists them as a segmented
//! queue and then works through the queue in short execution windows. Each
//! window is bounded by an item and time budget, may be interrupted at any
//! point and leaves enough durable state behind for the next window (in this
//! process or another one) to carry on.
//!
//! ## Components
//!
//! - **Queue Store** (`queue`): durable FIFO split into `{action}_batch_{seq}` segments
//! - **Job Controller** (`controller`): `BackgroundSync`, start/stop/complete and the window loop
//! - **Dispatcher** (`dispatcher`): trigger scheduling, window budget and the reentrancy lock
//! - **Job Lifecycle** (`job`): derived states, process metadata, window reports
//! - **Progress** (`progress`): id checkpoints and failure ledgers per sync mode
//! - **Registry** (`registry`): one type-erased controller per job kind
//! - **Jobs** (`jobs`): media library and non-library file sync

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod jobs;
pub mod progress;
pub mod queue;
pub mod registry;

pub use controller::{BackgroundSync, JobDependencies, SyncJob, STUCK_PROCESS_NOTICE};
pub use dispatcher::{Dispatcher, ProcessLock, WindowBudget, WindowGuard};
pub use error::{ErrorKind, Result, SyncError, TaskError};
pub use job::{
    HelperWindow, JobState, LastRun, ProcessMeta, RunOutcome, StartOptions, SyncProgress,
    TaskContext, TaskOutcome, WindowExit, WindowReport,
};
pub use jobs::{LibrarySync, NonLibrarySync, LIBRARY_ACTION, NON_LIBRARY_ACTION};
pub use progress::{Checkpoint, ProgressTracker, SyncMode};
pub use queue::{QueuedItem, QueueStore};
pub use registry::{JobRegistry, SyncControl, SyncKind};
