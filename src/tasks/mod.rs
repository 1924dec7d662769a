//! Repeating background tasks
//!
//! Skills use the scheduler for periodic work such as polling an external
//! service. A task runs once immediately and then once per period until it
//! is cleared. Runs of one task never overlap.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Identifier of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Shortest period a task is scheduled with
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Owns the interval tasks started through it
///
/// Dropping the scheduler cancels every task.
#[derive(Default)]
pub struct TaskScheduler {
    tasks: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` now and then every `period`
    ///
    /// Must be called from within a Tokio runtime. A panicking run is logged
    /// and the schedule continues. Periods below [`MIN_PERIOD`] are raised to
    /// it.
    pub fn set_interval<F, Fut>(&self, period: Duration, task: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = TaskId::new();
        let period = if period < MIN_PERIOD {
            warn!("Task {} period {:?} raised to {:?}", id, period, MIN_PERIOD);
            MIN_PERIOD
        } else {
            period
        };
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // building the future runs skill code too
                let run = AssertUnwindSafe(async { task().await }).catch_unwind();
                if run.await.is_err() {
                    error!("Scheduled task {} panicked", id);
                }
            }
        });

        debug!("Scheduled task {} every {:?}", id, period);
        self.lock().insert(id, handle);
        id
    }

    /// Stop a task; false when it was not scheduled here
    pub fn clear(&self, id: TaskId) -> bool {
        match self.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                debug!("Cleared task {}", id);
                true
            }
            None => false,
        }
    }

    /// Stop every task
    pub fn clear_all(&self) {
        let handles: Vec<_> = self.lock().drain().collect();
        for (_, handle) in &handles {
            handle.abort();
        }
        debug!("Cleared {} task(s)", handles.len());
    }

    /// Ids of tasks still scheduled
    pub fn active(&self) -> Vec<TaskId> {
        self.lock().keys().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.clear_all();
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("active", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn() -> futures::future::Ready<()> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_period() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler.set_interval(Duration::from_secs(10), counting(&runs));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_stops_task() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let id = scheduler.set_interval(Duration::from_secs(1), counting(&runs));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(scheduler.clear(id));
        let after_clear = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_clear);
        assert!(!scheduler.clear(id));
        assert!(scheduler.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler.set_interval(Duration::from_secs(1), counting(&runs));
        scheduler.set_interval(Duration::from_secs(2), counting(&runs));
        assert_eq!(scheduler.active().len(), 2);

        scheduler.clear_all();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(scheduler.active().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_run_keeps_schedule() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.set_interval(Duration::from_secs(1), move || {
            let run = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if run == 0 {
                    panic!("first run fails");
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_while_building_run_keeps_schedule() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let id = scheduler.set_interval(Duration::from_secs(1), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run fails before yielding a future");
            }
            futures::future::ready(())
        });
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.active(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_raised() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler.set_interval(Duration::ZERO, counting(&runs));
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(scheduler.active().len(), 1);
    }
}
