//! Background Task Execution Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{BackgroundExecutor, TaskHandler, TaskId, TaskStatus},
    error::{BridgeError, Result},
    time::{Clock, SystemClock},
};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tokio-based background executor for desktop.
///
/// Firings run on spawned tokio tasks; a slow handler never blocks the
/// scheduler, so two firings of the same recurring task may overlap.
pub struct TokioBackgroundExecutor {
    tasks: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
    handlers: Arc<RwLock<HashMap<String, TaskHandler>>>,
    clock: Arc<dyn Clock>,
    generations: AtomicU64,
}

struct TaskInfo {
    /// Distinguishes a record from the one it replaced under the same id
    generation: u64,
    status: TaskStatus,
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    last_run: Option<i64>,
    next_run: Option<i64>,
}

impl TokioBackgroundExecutor {
    /// Create a new background executor.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a background executor with a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            clock,
            generations: AtomicU64::new(0),
        }
    }

    fn now_millis(clock: &dyn Clock) -> i64 {
        clock.unix_timestamp_millis()
    }

    fn duration_to_millis(duration: Duration) -> i64 {
        duration.as_millis().min(i64::MAX as u128) as i64
    }

    fn schedule_after(clock: &dyn Clock, delay: Duration) -> i64 {
        let now = Self::now_millis(clock);
        now.saturating_add(Self::duration_to_millis(delay))
    }

    fn millis_to_duration(millis: i64) -> Duration {
        if millis <= 0 {
            Duration::from_secs(0)
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Register a closure-based handler that will be invoked when the task executes.
    pub async fn register_task_handler<F, Fut>(&self, task_id: &str, handler: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.register_handler(task_id, Arc::new(move || handler().boxed()))
            .await
    }

    async fn handler_for(&self, task_id: &str) -> Result<TaskHandler> {
        let handlers = self.handlers.read().await;
        handlers.get(task_id).cloned().ok_or_else(|| {
            BridgeError::OperationFailed(format!("No handler registered for task: {}", task_id))
        })
    }

    /// Insert a fresh task record, cancelling whatever was scheduled under the same id.
    async fn replace_task(&self, id: TaskId, info: TaskInfo) {
        let mut tasks = self.tasks.write().await;
        if let Some(previous) = tasks.insert(id, info) {
            previous.cancel.cancel();
        }
    }

    async fn attach_handle(&self, id: &TaskId, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.write().await;
        if let Some(info) = tasks.get_mut(id) {
            info.handle = Some(handle);
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    async fn update<F>(
        tasks: &RwLock<HashMap<TaskId, TaskInfo>>,
        id: &TaskId,
        generation: u64,
        apply: F,
    ) where
        F: FnOnce(&mut TaskInfo),
    {
        let mut tasks = tasks.write().await;
        if let Some(info) = tasks.get_mut(id) {
            if info.generation == generation {
                apply(info);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_recurring_task(
        tasks: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
        id: TaskId,
        generation: u64,
        handler: TaskHandler,
        period: Duration,
        cancel: CancellationToken,
        clock: Arc<dyn Clock>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let period_millis = Self::duration_to_millis(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    Self::update(&tasks, &id, generation, |info| {
                        info.status = TaskStatus::Running
                    })
                    .await;

                    let status = match handler().await {
                        Ok(()) => TaskStatus::Completed,
                        Err(err) => {
                            warn!(task_id = %id, error = %err, "Recurring task failed");
                            TaskStatus::Failed
                        }
                    };

                    let now = Self::now_millis(clock.as_ref());
                    Self::update(&tasks, &id, generation, |info| {
                        info.last_run = Some(now);
                        info.next_run = Some(now.saturating_add(period_millis));
                        info.status = status;
                    })
                    .await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_one_time_task(
        tasks: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
        id: TaskId,
        generation: u64,
        handler: TaskHandler,
        delay: Duration,
        cancel: CancellationToken,
        clock: Arc<dyn Clock>,
    ) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }

        Self::update(&tasks, &id, generation, |info| {
            info.status = TaskStatus::Running
        })
        .await;

        let status = match handler().await {
            Ok(()) => TaskStatus::Completed,
            Err(err) => {
                warn!(task_id = %id, error = %err, "One-time task failed");
                TaskStatus::Failed
            }
        };

        let now = Self::now_millis(clock.as_ref());
        Self::update(&tasks, &id, generation, |info| {
            info.last_run = Some(now);
            info.next_run = None;
            info.status = status;
        })
        .await;
    }
}

impl Default for TokioBackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundExecutor for TokioBackgroundExecutor {
    async fn register_handler(&self, task_id: &str, handler: TaskHandler) -> Result<()> {
        let mut handlers = self.handlers.write().await;
        handlers.insert(task_id.to_string(), handler);
        debug!(task_id = task_id, "Registered task handler");
        Ok(())
    }

    async fn schedule_task(&self, task_id: &str, interval: Duration) -> Result<TaskId> {
        if interval.is_zero() {
            return Err(BridgeError::OperationFailed(format!(
                "Recurring task {} needs a non-zero interval",
                task_id
            )));
        }

        let id = TaskId::new(task_id);

        debug!(
            task_id = task_id,
            interval_secs = interval.as_secs(),
            "Scheduling recurring task"
        );

        let handler = self.handler_for(task_id).await?;
        let cancel = CancellationToken::new();
        let generation = self.next_generation();

        self.replace_task(
            id.clone(),
            TaskInfo {
                generation,
                status: TaskStatus::Scheduled,
                handle: None,
                cancel: cancel.clone(),
                last_run: None,
                next_run: Some(Self::schedule_after(self.clock.as_ref(), interval)),
            },
        )
        .await;

        let handle = tokio::spawn(Self::run_recurring_task(
            Arc::clone(&self.tasks),
            id.clone(),
            generation,
            handler,
            interval,
            cancel,
            Arc::clone(&self.clock),
        ));
        self.attach_handle(&id, handle).await;

        Ok(id)
    }

    async fn schedule_once(&self, task_id: &str, delay: Duration) -> Result<TaskId> {
        let id = TaskId::new(task_id);

        debug!(
            task_id = task_id,
            delay_ms = delay.as_millis() as u64,
            "Scheduling one-time task"
        );

        let handler = self.handler_for(task_id).await?;
        let cancel = CancellationToken::new();
        let generation = self.next_generation();

        self.replace_task(
            id.clone(),
            TaskInfo {
                generation,
                status: TaskStatus::Scheduled,
                handle: None,
                cancel: cancel.clone(),
                last_run: None,
                next_run: Some(Self::schedule_after(self.clock.as_ref(), delay)),
            },
        )
        .await;

        let handle = tokio::spawn(Self::run_one_time_task(
            Arc::clone(&self.tasks),
            id.clone(),
            generation,
            handler,
            delay,
            cancel,
            Arc::clone(&self.clock),
        ));
        self.attach_handle(&id, handle).await;

        Ok(id)
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        debug!(task_id = %task_id, "Cancelling task");

        let removed = self.tasks.write().await.remove(task_id);
        if let Some(info) = removed {
            info.cancel.cancel();
            // A running handler is left to finish; only idle waits are aborted.
            if info.status != TaskStatus::Running {
                if let Some(handle) = info.handle {
                    handle.abort();
                }
            }
        }
        Ok(())
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|info| info.status.clone())
            .ok_or_else(|| BridgeError::OperationFailed(format!("Task not found: {}", task_id)))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskId>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.keys().cloned().collect())
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>> {
        let tasks = self.tasks.read().await;
        if let Some(info) = tasks.get(task_id) {
            if let Some(next) = info.next_run {
                let now = Self::now_millis(self.clock.as_ref());
                let remaining = next - now;
                Ok(Some(Self::millis_to_duration(remaining)))
            } else {
                Ok(None)
            }
        } else {
            Err(BridgeError::OperationFailed(format!(
                "Task not found: {}",
                task_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_background_executor_creation() {
        let executor = TokioBackgroundExecutor::new();
        assert!(executor.is_available().await);
        assert!(executor.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_task_runs_handler() {
        let executor = TokioBackgroundExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        executor
            .register_task_handler("test", move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        let task_id = executor
            .schedule_task("test", Duration::from_millis(30))
            .await
            .unwrap();

        sleep(Duration::from_millis(150)).await;

        assert!(executor.get_task_status(&task_id).await.unwrap() != TaskStatus::Cancelled);
        assert!(counter.load(Ordering::SeqCst) >= 2);

        executor.cancel_task(&task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_schedule_once_executes() {
        let executor = TokioBackgroundExecutor::new();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);

        executor
            .register_task_handler("once", move || {
                let flag = Arc::clone(&flag_clone);
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        let task_id = executor
            .schedule_once("once", Duration::from_millis(25))
            .await
            .unwrap();

        sleep(Duration::from_millis(120)).await;

        assert_eq!(
            executor.get_task_status(&task_id).await.unwrap(),
            TaskStatus::Completed
        );
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_handler_keeps_recurring() {
        let executor = TokioBackgroundExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        executor
            .register_task_handler("flaky", move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BridgeError::OperationFailed("boom".to_string()))
                }
            })
            .await
            .unwrap();

        let task_id = executor
            .schedule_task("flaky", Duration::from_millis(25))
            .await
            .unwrap();

        sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2);

        executor.cancel_task(&task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_task_is_rejected() {
        let executor = TokioBackgroundExecutor::new();
        let result = executor.schedule_once("nobody", Duration::ZERO).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_task() {
        let executor = TokioBackgroundExecutor::new();
        executor
            .register_task_handler("cancel", || async { Ok(()) })
            .await
            .unwrap();

        let task_id = executor
            .schedule_task("cancel", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(executor.next_execution_time(&task_id).await.unwrap().is_some());

        executor.cancel_task(&task_id).await.unwrap();
        assert!(executor.get_task_status(&task_id).await.is_err());

        // Cancelling twice is fine
        executor.cancel_task(&task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_rescheduling_replaces_previous_schedule() {
        let executor = TokioBackgroundExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        executor
            .register_task_handler("again", move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        executor
            .schedule_once("again", Duration::from_millis(40))
            .await
            .unwrap();
        executor
            .schedule_once("again", Duration::from_millis(40))
            .await
            .unwrap();

        sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(executor.list_tasks().await.unwrap().len(), 1);
    }
}
