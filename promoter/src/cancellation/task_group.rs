//! Supervised task group for one batch of independent checks.

use crate::errors::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// How a supervised task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Returned `Ok`.
    Completed,
    /// Returned an error.
    Failed(String),
    /// Exceeded its deadline and was dropped.
    TimedOut,
    /// Panicked or was aborted.
    Panicked(String),
}

impl TaskOutcome {
    /// Returns true for [`TaskOutcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// The outcome of one named task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// The name given at spawn time.
    pub name: String,
    /// How it ended.
    pub outcome: TaskOutcome,
    /// Time spent running, excluding time queued for a worker.
    pub elapsed: Duration,
}

/// A group of independent tasks sharing a bounded worker pool.
///
/// Each task runs under its own deadline. A task that fails, panics or times
/// out never cancels its siblings; [`wait`](Self::wait) always joins every
/// task and reports each outcome.
pub struct SupervisedTaskGroup {
    permits: Arc<Semaphore>,
    handles: Mutex<Vec<(String, JoinHandle<(TaskOutcome, Duration)>)>>,
}

impl SupervisedTaskGroup {
    /// Creates a group that runs at most `max_concurrency` tasks at once.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns a task with a deadline. The deadline starts once a worker is free.
    pub fn spawn<F>(&self, name: impl Into<String>, timeout: Duration, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return (TaskOutcome::Failed("worker pool closed".to_string()), Duration::ZERO);
            };
            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                Err(_) => TaskOutcome::TimedOut,
            };
            (outcome, started.elapsed())
        });
        self.handles.lock().push((name.into(), handle));
    }

    /// Waits for every spawned task and returns their outcomes in spawn order.
    pub async fn wait(&self) -> Vec<TaskReport> {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut reports = Vec::with_capacity(handles.len());

        for (name, handle) in handles {
            let (outcome, elapsed) = match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    error!(task = %name, error = %join_error, "Supervised task panicked");
                    (TaskOutcome::Panicked(join_error.to_string()), Duration::ZERO)
                }
            };
            if let TaskOutcome::Failed(message) = &outcome {
                warn!(task = %name, error = %message, "Supervised task failed");
            }
            reports.push(TaskReport {
                name,
                outcome,
                elapsed,
            });
        }
        reports
    }

    /// Returns the number of tasks not yet joined.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl std::fmt::Debug for SupervisedTaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedTaskGroup")
            .field("task_count", &self.task_count())
            .field("available_workers", &self.permits.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PromoterError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_outcomes_are_isolated() {
        let group = SupervisedTaskGroup::new(4);
        let finished = Arc::new(AtomicUsize::new(0));

        group.spawn("ok", Duration::from_secs(1), async { Ok(()) });
        group.spawn("failing", Duration::from_secs(1), async {
            Err(PromoterError::internal("boom"))
        });
        group.spawn("slow", Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        let counter = finished.clone();
        group.spawn("sibling", Duration::from_secs(1), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let explode = true;
        group.spawn("panics", Duration::from_secs(1), async move {
            assert!(!explode, "intentional");
            Ok(())
        });

        let reports = group.wait().await;
        let outcomes: Vec<(&str, &TaskOutcome)> = reports.iter().map(|r| (r.name.as_str(), &r.outcome)).collect();

        assert_eq!(outcomes[0], ("ok", &TaskOutcome::Completed));
        assert!(matches!(outcomes[1], ("failing", TaskOutcome::Failed(m)) if m.contains("boom")));
        assert_eq!(outcomes[2], ("slow", &TaskOutcome::TimedOut));
        assert_eq!(outcomes[3], ("sibling", &TaskOutcome::Completed));
        assert!(matches!(outcomes[4], ("panics", TaskOutcome::Panicked(_))));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(group.task_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let group = SupervisedTaskGroup::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            group.spawn(format!("task-{i}"), Duration::from_secs(1), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let reports = group.wait().await;
        assert_eq!(reports.len(), 6);
        assert!(reports.iter().all(|r| r.outcome.is_completed()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
