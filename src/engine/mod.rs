// src/engine/mod.rs

//! Job engine.
//!
//! This module ties together:
//! - the per-job scheduler (see [`crate::dag::Scheduler`])
//! - the engine-wide lock table shared by every job
//! - the worker pool that runs task bodies
//! - job-level concurrency, abort and shutdown
//!
//! Each submitted job gets its own async [`runtime`] loop; the pure
//! scheduling state machine lives in `dag`.

pub mod job;
pub mod observer;
pub mod queue;
pub(crate) mod runtime;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::dag::{Scheduler, TaskGraph, TaskReport};
use crate::errors::{JobgraphError, Result};
use crate::exec::{PooledExecutor, TaskExecutor};
use crate::lock::LockManager;
use crate::types::TaskState;

pub use job::{JobHandle, JobId, JobSummary};
pub use observer::JobObserver;
pub use queue::{JobQueue, QueueTicket};

use job::JobShared;
use runtime::JobRuntime;

/// Default number of worker threads running task bodies.
pub const DEFAULT_TASK_POOL_SIZE: usize = 40;

/// Default number of jobs running at the same time.
pub const DEFAULT_JOB_POOL_SIZE: usize = 10;

/// Terminal outcome of one task, as a tagged result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Passed,
    Failed(String),
    Skipped,
    Aborted,
}

impl TaskReport {
    /// Terminal outcome, or `None` while the task is still pending/running.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self.state {
            TaskState::Passed => Some(TaskOutcome::Passed),
            TaskState::Failed => Some(TaskOutcome::Failed(self.error.clone().unwrap_or_default())),
            TaskState::Skipped => Some(TaskOutcome::Skipped),
            TaskState::Aborted => Some(TaskOutcome::Aborted),
            TaskState::Pending | TaskState::Queued | TaskState::Running => None,
        }
    }
}

/// Engine sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub task_pool_size: usize,
    pub job_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_pool_size: DEFAULT_TASK_POOL_SIZE,
            job_pool_size: DEFAULT_JOB_POOL_SIZE,
        }
    }
}

/// A graph to run plus per-submission observers.
pub struct JobRequest {
    pub name: String,
    pub graph: TaskGraph,
    pub observers: Vec<Arc<dyn JobObserver>>,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, graph: TaskGraph) -> Self {
        Self {
            name: name.into(),
            graph,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl std::fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRequest")
            .field("name", &self.name)
            .field("tasks", &self.graph.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

struct EngineInner {
    config: EngineConfig,
    locks: Arc<LockManager>,
    executor: Arc<dyn TaskExecutor>,
    broadcaster: Broadcaster,
    job_slots: Arc<Semaphore>,
    jobs: Mutex<BTreeMap<JobId, JobHandle>>,
    observers: Mutex<Vec<Arc<dyn JobObserver>>>,
    next_job_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl EngineInner {
    fn jobs(&self) -> MutexGuard<'_, BTreeMap<JobId, JobHandle>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn observers(&self) -> MutexGuard<'_, Vec<Arc<dyn JobObserver>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs task graphs as jobs.
///
/// Cheap to clone; clones share the same jobs, locks and pools. Must be used
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("config", &self.inner.config)
            .field("active_jobs", &self.inner.jobs().len())
            .field("locks_held", &self.inner.locks.held_count())
            .finish()
    }
}

impl JobEngine {
    /// Engine with a [`PooledExecutor`] of `config.task_pool_size` workers and
    /// a fresh [`Broadcaster`].
    pub fn new(config: EngineConfig) -> Self {
        let executor = Arc::new(PooledExecutor::new(config.task_pool_size));
        Self::with_parts(config, executor, Broadcaster::new())
    }

    /// Engine with a custom executor (tests, embedding).
    pub fn with_executor(config: EngineConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self::with_parts(config, executor, Broadcaster::new())
    }

    pub fn with_parts(
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        broadcaster: Broadcaster,
    ) -> Self {
        info!(
            task_pool_size = config.task_pool_size,
            job_pool_size = config.job_pool_size,
            "job engine started"
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                locks: Arc::new(LockManager::new()),
                executor,
                broadcaster,
                job_slots: Arc::new(Semaphore::new(config.job_pool_size.max(1))),
                jobs: Mutex::new(BTreeMap::new()),
                observers: Mutex::new(Vec::new()),
                next_job_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.inner.config
    }

    /// Broadcaster handed to every task context of this engine.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    /// Engine-wide lock table.
    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Register an observer for every job submitted from now on.
    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        self.inner.observers().push(observer);
    }

    /// Submit `graph` as a new job.
    pub fn submit(&self, name: impl Into<String>, graph: TaskGraph) -> Result<JobHandle> {
        self.submit_request(JobRequest::new(name, graph))
    }

    pub fn submit_request(&self, request: JobRequest) -> Result<JobHandle> {
        let JobRequest {
            name,
            graph,
            observers: mut job_observers,
        } = request;

        if self.is_shutting_down() {
            return Err(JobgraphError::EngineShutdown(name));
        }

        let id = JobId::new(self.inner.next_job_id.fetch_add(1, Ordering::Relaxed));

        let mut observers = self.inner.observers().clone();
        observers.append(&mut job_observers);

        let shared = Arc::new(JobShared::new(id, name.clone(), Vec::new()));
        let scheduler = Scheduler::new(id, graph, shared.abort.clone())
            .with_broadcaster(self.inner.broadcaster.clone());
        let reports = scheduler.reports();
        shared.summary.send_modify(|s| s.reports = reports);

        let handle = JobHandle::new(Arc::clone(&shared));
        self.inner.jobs().insert(id, handle.clone());

        info!(job_id = %id, job = %name, tasks = scheduler.graph().len(), "job submitted");

        let runtime = JobRuntime::new(
            scheduler,
            Arc::clone(&shared),
            Arc::clone(&self.inner.locks),
            Arc::clone(&self.inner.executor),
            observers,
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let slot = tokio::select! {
                biased;
                _ = shared.abort.cancelled() => None,
                permit = Arc::clone(&inner.job_slots).acquire_owned() => permit.ok(),
            };

            match slot {
                Some(_permit) => {
                    runtime.run().await;
                }
                None => {
                    debug!(job_id = %id, "job aborted while waiting for a job slot");
                    runtime.abort_unstarted();
                }
            }

            inner.jobs().remove(&id);
        });

        Ok(handle)
    }

    /// Handle of an active (not yet finished) job.
    pub fn job(&self, id: JobId) -> Option<JobHandle> {
        self.inner.jobs().get(&id).cloned()
    }

    /// Handles of every active job, oldest first.
    pub fn active_jobs(&self) -> Vec<JobHandle> {
        self.inner.jobs().values().cloned().collect()
    }

    pub fn abort_job(&self, id: JobId, reason: &str) -> Result<()> {
        let handle = self
            .job(id)
            .ok_or(JobgraphError::JobNotFound(id.as_u64()))?;
        handle.abort(reason);
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Reject further submissions, abort every active job, wait for them to
    /// finish, then deliver outstanding broadcasts and close the broadcaster.
    pub async fn shutdown(&self, reason: &str) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("job engine already shutting down");
        }
        info!(reason, "job engine shutting down");

        let jobs = self.active_jobs();
        for job in &jobs {
            job.abort(reason);
        }
        for job in &jobs {
            job.wait().await;
        }

        self.inner.broadcaster.flush().await;
        self.inner.broadcaster.close();
        info!("job engine stopped");
    }
}
