// src/engine/runtime.rs

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::dag::{Scheduler, SchedulerStep, TaskCompletion};
use crate::errors::{TaskError, panic_message};
use crate::exec::TaskExecutor;
use crate::lock::LockManager;
use crate::types::JobState;

use super::job::{JobShared, JobSummary};
use super::observer::JobObserver;

/// Drives one job's [`Scheduler`] and delegates task execution to a
/// [`TaskExecutor`].
///
/// This is the IO shell around the scheduler: it waits for completions,
/// abort requests and lock releases, feeds them in, dispatches what comes
/// out, and publishes snapshots and observer callbacks.
pub(crate) struct JobRuntime {
    scheduler: Scheduler,
    shared: Arc<JobShared>,
    locks: Arc<LockManager>,
    executor: Arc<dyn TaskExecutor>,
    observers: Vec<Arc<dyn JobObserver>>,
    completion_tx: mpsc::UnboundedSender<TaskCompletion>,
    completion_rx: mpsc::UnboundedReceiver<TaskCompletion>,
    lock_rx: watch::Receiver<u64>,
}

impl fmt::Debug for JobRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRuntime")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl JobRuntime {
    pub fn new(
        scheduler: Scheduler,
        shared: Arc<JobShared>,
        locks: Arc<LockManager>,
        executor: Arc<dyn TaskExecutor>,
        observers: Vec<Arc<dyn JobObserver>>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let lock_rx = locks.subscribe();
        Self {
            scheduler,
            shared,
            locks,
            executor,
            observers,
            completion_tx,
            completion_rx,
            lock_rx,
        }
    }

    /// Abort before the job got a slot: every task ends `Aborted`.
    pub fn abort_unstarted(mut self) -> JobSummary {
        let reason = self.shared.abort_reason();
        let step = self.scheduler.abort(&reason);
        self.notify(&step);
        self.finish()
    }

    /// Main loop. Returns once every task is terminal.
    pub async fn run(mut self) -> JobSummary {
        info!(job_id = %self.shared.id, job = %self.shared.name, tasks = self.scheduler.graph().len(), "job started");
        self.publish(Some(JobState::Running), true);

        let step = self.scheduler.start();
        self.notify(&step);
        self.dispatch().await;

        let abort = self.shared.abort.clone();
        let mut abort_seen = false;

        while !self.scheduler.is_finished() {
            let deferred = self.scheduler.has_queued();

            tokio::select! {
                Some(completion) = self.completion_rx.recv() => {
                    let step = self.scheduler.complete(completion, &self.locks);
                    self.notify(&step);
                    self.dispatch().await;
                }
                _ = abort.cancelled(), if !abort_seen => {
                    abort_seen = true;
                    let reason = self.shared.abort_reason();
                    let step = self.scheduler.abort(&reason);
                    self.notify(&step);
                }
                _ = self.lock_rx.changed(), if deferred => {
                    debug!(job_id = %self.shared.id, "lock released elsewhere; retrying deferred tasks");
                    self.dispatch().await;
                }
            }
        }

        self.finish()
    }

    async fn dispatch(&mut self) {
        // Mark the current release generation as seen before trying, so a
        // release that races with this attempt still wakes the loop.
        self.lock_rx.borrow_and_update();

        let tasks = self.scheduler.take_dispatchable(&self.locks);
        if tasks.is_empty() {
            return;
        }

        let changed: Vec<_> = tasks.iter().map(|t| t.task_id).collect();
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        debug!(job_id = %self.shared.id, ?names, "spawning ready tasks");

        self.notify(&SchedulerStep {
            changed: changed.clone(),
            ..SchedulerStep::default()
        });

        let spawned = self
            .executor
            .spawn_ready_tasks(tasks, self.completion_tx.clone())
            .await;

        // Fail whatever the executor did not take; completions for tasks it
        // did take are ignored by the scheduler as duplicates.
        if let Err(err) = spawned {
            error!(job_id = %self.shared.id, error = %err, "executor rejected tasks");
            for task_id in changed {
                let _ = self.completion_tx.send(TaskCompletion::failed(
                    task_id,
                    TaskError::execution(format!("executor rejected task: {err}")),
                ));
            }
        }
    }

    /// Publish a snapshot and call observers for every changed task.
    fn notify(&self, step: &SchedulerStep) {
        if step.changed.is_empty() {
            return;
        }

        for id in &step.changed {
            if let Some(report) = self.scheduler.report(*id) {
                for observer in &self.observers {
                    self.call_observer("task_changed", || {
                        observer.task_changed(self.shared.id, &report)
                    });
                }
            }
        }

        self.publish(None, false);
    }

    fn publish(&self, state: Option<JobState>, starting: bool) {
        let reports = self.scheduler.reports();
        self.shared.summary.send_modify(|summary| {
            if let Some(state) = state {
                summary.state = state;
            }
            summary.reports = reports;
            if starting {
                summary.started_at = Some(Utc::now());
            }
        });
    }

    fn finish(self) -> JobSummary {
        let state = self.scheduler.job_state();
        let failure_reason = self.scheduler.failure_reason();
        let reports = self.scheduler.reports();

        self.shared.summary.send_modify(|summary| {
            summary.state = state;
            summary.reports = reports;
            summary.failure_reason = failure_reason;
            summary.completed_at = Some(Utc::now());
        });

        let summary = self.shared.summary.borrow().clone();
        match summary.state {
            JobState::Completed => {
                info!(job_id = %summary.id, job = %summary.name, "job completed")
            }
            state => warn!(
                job_id = %summary.id,
                job = %summary.name,
                %state,
                reason = summary.failure_reason.as_deref().unwrap_or_default(),
                "job did not complete"
            ),
        }

        for observer in &self.observers {
            self.call_observer("job_completed", || observer.job_completed(&summary));
        }

        summary
    }

    /// A panicking observer is logged and skipped; the job keeps running.
    fn call_observer(&self, callback: &str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            error!(
                job_id = %self.shared.id,
                callback,
                panic = %panic_message(payload.as_ref()),
                "job observer panicked"
            );
        }
    }
}
