//! # Sync Job Lifecycle
//!
//! Types describing one background job run: its derived state, the durable
//! process metadata, the options it was started with and the reports an
//! execution window produces.
//!
//! ## Overview
//!
//! A job has no in-memory state that survives a trigger. Everything below is
//! either persisted in the `SettingsStore` or derived from what is persisted:
//!
//! - `{action}_process_meta` exists while a run is active ([`ProcessMeta`])
//! - `{action}_stopped` marks a stop request
//! - `{action}_process_lock` is present while a window executes
//! - `{action}_last_run` summarizes the previous run ([`LastRun`])
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐ start ┌─────────┐ queue drained ┌───────────┐
//!   │ Idle ├──────>│ Running ├──────────────>│ Completed │
//!   └──────┘       └────┬────┘               └─────┬─────┘
//!                       │ stop / fatal error       │ start
//!                       v                          │
//!                 ┌──────────┐  window exits       │
//!                 │ Stopping ├──────────┐          │
//!                 └──────────┘          v          │
//!                                  ┌─────────┐     │
//!                                  │ Stopped │<────┘ (stop)
//!                                  └────┬────┘
//!                                       │ start
//!                                       └──────> Running
//! ```
//!
//! `Stopping` is only observable while a window still holds the process
//! lock after a stop was requested.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SyncError, TaskError};

// ============================================================================
// Job State
// ============================================================================

/// Lifecycle state of a job, derived from persisted keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Never started
    Idle,
    /// A run is active; windows drain the queue
    Running,
    /// A stop was requested while a window is still executing
    Stopping,
    /// Last run ended by an operator stop or an error
    Stopped,
    /// Last run drained its queue
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Stopping => "stopping",
            JobState::Stopped => "stopped",
            JobState::Completed => "completed",
        }
    }

    /// True while windows may still process items
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Stopped | JobState::Completed)
    }

    /// Whether moving from `self` to `to` is a legal transition.
    ///
    /// Stopping is always allowed so that `stop()` stays idempotent.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        match to {
            JobState::Idle => false,
            JobState::Running => matches!(
                self,
                JobState::Idle | JobState::Stopped | JobState::Completed
            ),
            JobState::Stopping => *self == JobState::Running,
            JobState::Stopped => true,
            JobState::Completed => *self == JobState::Running,
        }
    }

    pub fn validate_transition(&self, to: JobState) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.to_string(),
                to: to.to_string(),
                reason: format!("a {} job cannot become {}", self, to),
            })
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(JobState::Idle),
            "running" => Ok(JobState::Running),
            "stopping" => Ok(JobState::Stopping),
            "stopped" => Ok(JobState::Stopped),
            "completed" => Ok(JobState::Completed),
            other => Err(SyncError::InvalidState(other.to_string())),
        }
    }
}

// ============================================================================
// Start Options
// ============================================================================

/// Parameters of a `start()` call, persisted for the whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    /// Skip items already covered by the job's checkpoint
    #[serde(default)]
    pub resume: bool,

    /// Continue from this item id (resumable jobs only)
    #[serde(default)]
    pub start_from: Option<i64>,

    /// Started from a command-line surface rather than the admin UI
    #[serde(default)]
    pub cli: bool,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(mut self) -> Self {
        self.resume = true;
        self
    }

    pub fn start_from(mut self, id: i64) -> Self {
        self.resume = true;
        self.start_from = Some(id);
        self
    }

    pub fn cli(mut self) -> Self {
        self.cli = true;
        self
    }
}

// ============================================================================
// Process Metadata
// ============================================================================

/// Durable record of the active run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMeta {
    pub run_id: Uuid,

    /// Unix seconds when the run started
    pub starttime: i64,

    /// Unix seconds of the last item outcome (heartbeat)
    #[serde(default)]
    pub last_at: Option<i64>,

    /// Items that completed successfully
    #[serde(default)]
    pub processed: u64,

    /// Items dropped as unprocessable
    #[serde(default)]
    pub failed: u64,

    /// Items enqueued so far, including queue extensions
    pub total: u64,

    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub options: StartOptions,
}

impl ProcessMeta {
    pub fn new(starttime: i64, total: u64, options: StartOptions) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            starttime,
            last_at: None,
            processed: 0,
            failed: 0,
            total,
            last_error: None,
            options,
        }
    }

    /// Items that reached a terminal outcome
    pub fn handled(&self) -> u64 {
        self.processed + self.failed
    }

    /// Completion percentage, 0 when nothing was enqueued
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.handled().min(self.total) * 100) / self.total) as u8
    }

    /// Heartbeat, falling back to the start time
    pub fn last_activity(&self) -> i64 {
        self.last_at.unwrap_or(self.starttime)
    }
}

/// How the previous run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// Summary written when a run completes or stops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub run_id: Option<Uuid>,
    pub outcome: RunOutcome,
    pub started_at: Option<i64>,
    pub finished_at: i64,
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl LastRun {
    pub fn from_meta(
        meta: Option<&ProcessMeta>,
        outcome: RunOutcome,
        finished_at: i64,
        error: Option<String>,
    ) -> Self {
        Self {
            run_id: meta.map(|m| m.run_id),
            outcome,
            started_at: meta.map(|m| m.starttime),
            finished_at,
            processed: meta.map_or(0, |m| m.processed),
            failed: meta.map_or(0, |m| m.failed),
            total: meta.map_or(0, |m| m.total),
            error,
        }
    }
}

// ============================================================================
// Progress Snapshot
// ============================================================================

/// Point-in-time view of a job for operator surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub action: String,
    pub name: String,
    pub state: JobState,
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    /// Items still persisted in queue segments
    pub queued: u64,
    pub percent: u8,
    pub started_at: Option<i64>,
    pub last_at: Option<i64>,
    pub last_error: Option<String>,
    /// Stuck-process warning, if any
    pub notice: Option<String>,
}

/// Title and body of the explanatory panel shown next to a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperWindow {
    pub title: String,
    pub content: String,
}

impl HelperWindow {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

// ============================================================================
// Task and Window Outcomes
// ============================================================================

/// Successful result of one task invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Item finished; drop it and continue
    Done,
    /// Item finished; drop it and end the window early
    Yield,
    /// Item must run again; keep it at the head and end the window
    Retry,
}

/// Why an execution window returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowExit {
    /// Queue empty and nothing to extend it with; the run completed
    Drained,
    /// Item or time budget used up; another window was dispatched
    BudgetExhausted,
    /// The task asked to yield or retry; another window was dispatched
    Paused,
    /// The run was stopped, before or during the window
    Stopped,
    /// No active run
    NotRunning,
    /// Another window holds the process lock
    Busy,
}

impl WindowExit {
    /// Whether the run continues in a later window
    pub fn needs_followup(&self) -> bool {
        matches!(self, WindowExit::BudgetExhausted | WindowExit::Paused)
    }
}

/// What a single execution window did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReport {
    pub exit: WindowExit,
    pub processed: u64,
    pub failed: u64,
    /// Error that stopped the run in this window
    pub error: Option<TaskError>,
}

impl WindowReport {
    pub fn new(exit: WindowExit) -> Self {
        Self {
            exit,
            processed: 0,
            failed: 0,
            error: None,
        }
    }
}

/// Context handed to every task invocation of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub action: String,
    pub run_id: Uuid,
    pub options: StartOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Idle.can_transition_to(JobState::Running));
        assert!(JobState::Stopped.can_transition_to(JobState::Running));
        assert!(JobState::Completed.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Stopping));

        assert!(!JobState::Running.can_transition_to(JobState::Running));
        assert!(!JobState::Stopped.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Idle));
    }

    #[test]
    fn test_stop_is_always_allowed() {
        for state in [
            JobState::Idle,
            JobState::Running,
            JobState::Stopping,
            JobState::Stopped,
            JobState::Completed,
        ] {
            assert!(state.validate_transition(JobState::Stopped).is_ok());
        }
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = JobState::Stopped
            .validate_transition(JobState::Completed)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_state_round_trip_from_str() {
        assert_eq!("stopping".parse::<JobState>().unwrap(), JobState::Stopping);
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn test_meta_percent() {
        let mut meta = ProcessMeta::new(1_000, 4, StartOptions::default());
        assert_eq!(meta.percent(), 0);
        assert_eq!(meta.last_activity(), 1_000);

        meta.processed = 1;
        meta.failed = 1;
        meta.last_at = Some(1_060);
        assert_eq!(meta.percent(), 50);
        assert_eq!(meta.last_activity(), 1_060);

        let empty = ProcessMeta::new(1_000, 0, StartOptions::default());
        assert_eq!(empty.percent(), 0);
    }

    #[test]
    fn test_meta_tolerates_missing_fields() {
        let meta: ProcessMeta = serde_json::from_value(serde_json::json!({
            "run_id": Uuid::nil(),
            "starttime": 42,
            "total": 3
        }))
        .unwrap();
        assert_eq!(meta.processed, 0);
        assert_eq!(meta.last_at, None);
        assert_eq!(meta.options, StartOptions::default());
    }

    #[test]
    fn test_start_from_implies_resume() {
        let options = StartOptions::new().start_from(120);
        assert!(options.resume);
        assert_eq!(options.start_from, Some(120));
    }
}
