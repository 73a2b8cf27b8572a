//! Background Execution and Task Scheduling
//!
//! Provides the host's scheduled trigger: a best-effort mechanism that fires
//! registered callbacks once or periodically. Triggers may be delayed, dropped
//! or fire twice; anything built on top must tolerate all three.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Callback fired by the executor when a task comes due.
///
/// A returned error is logged by the executor and never cancels the task.
pub type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is scheduled but not yet running
    Scheduled,
    /// Task is currently executing
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed
    Failed,
    /// Task was cancelled
    Cancelled,
}

/// Background task executor trait
///
/// Abstracts platform-specific background task scheduling:
/// - **Hosted CMS**: pseudo-cron fired by incoming requests
/// - **Desktop**: an in-process tokio scheduler
/// - **Server**: system scheduler (cron, systemd timers)
///
/// # Delivery guarantees
///
/// None. A firing may arrive late, never, or more than once, and two firings
/// for the same task may overlap.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::BackgroundExecutor;
/// use std::time::Duration;
///
/// async fn schedule_healthcheck(executor: &dyn BackgroundExecutor) -> Result<()> {
///     executor
///         .schedule_task("bg_library_sync_cron", Duration::from_secs(300))
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Bind the callback fired for `task_id`
    ///
    /// Registering again for the same id replaces the previous handler.
    async fn register_handler(&self, task_id: &str, handler: TaskHandler) -> Result<()>;

    /// Schedule a recurring task
    ///
    /// Scheduling an id that is already scheduled replaces the old schedule.
    async fn schedule_task(&self, task_id: &str, interval: Duration) -> Result<TaskId>;

    /// Schedule a one-time delayed task
    ///
    /// A zero delay means "as soon as the host can".
    async fn schedule_once(&self, task_id: &str, delay: Duration) -> Result<TaskId>;

    /// Cancel a scheduled task. Cancelling an unknown task is not an error.
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;

    /// Get status of a task
    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// List all scheduled tasks
    async fn list_tasks(&self) -> Result<Vec<TaskId>>;

    /// Check if background execution is available
    async fn is_available(&self) -> bool {
        true
    }

    /// Get estimated time until next execution window
    ///
    /// Returns `None` if the information is not available or if the task
    /// will execute immediately.
    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("bg_library_sync_cron");
        assert_eq!(id.as_str(), "bg_library_sync_cron");
        assert_eq!(id.to_string(), "bg_library_sync_cron");
    }
}
