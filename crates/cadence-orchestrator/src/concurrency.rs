//! Concurrency controller: bounded-parallel task execution
//!
//! Maintains a sliding admission window of at most `limit` in-flight
//! tasks. As each task finishes the next queued task is admitted. Results
//! come back in completion order, not submission order. Individual task
//! failures never abort siblings; each outcome is wrapped.

use cadence_core::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wrapped outcome of one admitted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(String),
    TimedOut,
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Bounded-parallel task runner
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    limit: usize,
    task_timeout: Option<Duration>,
}

impl ConcurrencyController {
    /// Create a controller with the given admission window.
    ///
    /// Fails closed on `limit == 0`.
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(CadenceError::Validation(
                "Concurrency limit must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            limit,
            task_timeout: None,
        })
    }

    /// Apply a per-task timeout; timed-out tasks yield `TaskOutcome::TimedOut`
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run all tasks under the admission window.
    ///
    /// The in-flight count never exceeds the configured limit, including
    /// under task failure: a task's permit is held from admission until
    /// its outcome is wrapped. Results are in completion order; callers
    /// must not assume submission order.
    pub async fn run<T, Fut>(
        &self,
        tasks: Vec<Fut>,
        cancel: CancellationToken,
    ) -> Vec<TaskOutcome<T>>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let task_timeout = self.task_timeout;
        let mut join_set = JoinSet::new();

        let submitted = tasks.len();
        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                // Admission: wait for a window slot unless cancelled first
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TaskOutcome::Cancelled,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return TaskOutcome::Cancelled,
                    },
                };

                let work = async {
                    match task_timeout {
                        Some(timeout) => match tokio::time::timeout(timeout, task).await {
                            Ok(Ok(value)) => TaskOutcome::Completed(value),
                            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                            Err(_) => TaskOutcome::TimedOut,
                        },
                        None => match task.await {
                            Ok(value) => TaskOutcome::Completed(value),
                            Err(e) => TaskOutcome::Failed(e.to_string()),
                        },
                    }
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => TaskOutcome::Cancelled,
                    outcome = work => outcome,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(submitted);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!("Admitted task panicked: {}", e);
                    outcomes.push(TaskOutcome::Failed(format!("task panicked: {}", e)));
                }
            }
        }

        debug!(
            "Bounded run complete: {}/{} tasks succeeded (limit {})",
            outcomes.iter().filter(|o| o.is_completed()).count(),
            submitted,
            self.limit
        );
        outcomes
    }
}
