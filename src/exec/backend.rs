// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! The job runtime talks to a `TaskExecutor` instead of spawning work
//! itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production worker pool in [`PooledExecutor`].
//!
//! - `PooledExecutor` runs each task body on Tokio's blocking pool, bounded
//!   by a semaphore of `task_pool_size` permits shared by every job.
//! - Tests can provide their own `TaskExecutor` that, for example, runs the
//!   bodies inline and records the order they were dispatched in.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error};

use crate::dag::{ScheduledTask, TaskCompletion};
use crate::errors::{Result, TaskError};

use super::task_runner::run_task;

/// Trait abstracting how scheduled tasks are executed.
pub trait TaskExecutor: Send + Sync {
    /// Start the given tasks.
    ///
    /// Each task must eventually produce exactly one [`TaskCompletion`] on
    /// `completions`. The returned future resolves once the tasks have been
    /// handed off, not when they finish.
    fn spawn_ready_tasks(
        &self,
        tasks: Vec<ScheduledTask>,
        completions: mpsc::UnboundedSender<TaskCompletion>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production executor: a bounded pool of blocking workers.
#[derive(Debug, Clone)]
pub struct PooledExecutor {
    permits: Arc<Semaphore>,
    pool_size: usize,
}

impl PooledExecutor {
    /// `pool_size` is clamped to at least 1.
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Workers not currently running a task body.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

impl TaskExecutor for PooledExecutor {
    fn spawn_ready_tasks(
        &self,
        tasks: Vec<ScheduledTask>,
        completions: mpsc::UnboundedSender<TaskCompletion>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let permits = Arc::clone(&self.permits);

        Box::pin(async move {
            for task in tasks {
                let permits = Arc::clone(&permits);
                let completions = completions.clone();

                tokio::spawn(async move {
                    let task_id = task.task_id;
                    let name = task.name.clone();

                    let completion = match permits.acquire_owned().await {
                        Ok(_permit) => {
                            match tokio::task::spawn_blocking(move || run_task(&task)).await {
                                Ok(completion) => completion,
                                Err(join_err) => {
                                    error!(task_id = %task_id, task = %name, error = %join_err, "task worker panicked");
                                    TaskCompletion::failed(
                                        task_id,
                                        TaskError::execution(format!("task panicked: {join_err}")),
                                    )
                                }
                            }
                        }
                        Err(closed) => TaskCompletion::failed(
                            task_id,
                            TaskError::execution(format!("worker pool closed: {closed}")),
                        ),
                    };

                    if completions.send(completion).is_err() {
                        debug!(task_id = %task_id, task = %name, "job runtime gone; dropping completion");
                    }
                });
            }
            Ok(())
        })
    }
}
