// src/engine/job.rs

//! Job identity, status snapshots and the caller-side handle.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dag::{TaskId, TaskReport};
use crate::types::{JobState, TaskState};

/// Identity of a submitted job, unique per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn new(id: u64) -> Self {
        JobId(id)
    }

    /// Id used for task contexts that do not belong to any engine job.
    pub fn detached() -> Self {
        JobId(0)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    /// One report per task, in graph insertion order (expansions appended).
    pub reports: Vec<TaskReport>,
    pub failure_reason: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobSummary {
    pub(crate) fn queued(id: JobId, name: String, reports: Vec<TaskReport>) -> Self {
        Self {
            id,
            name,
            state: JobState::Queued,
            reports,
            failure_reason: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Report of the first task with the given name.
    pub fn report(&self, task: &str) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.name == task)
    }

    pub fn report_by_id(&self, id: TaskId) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.id == id)
    }

    /// State of the first task with the given name.
    pub fn task_state(&self, task: &str) -> Option<TaskState> {
        self.report(task).map(|r| r.state)
    }

    /// Names and states of every task.
    pub fn task_states(&self) -> Vec<(String, TaskState)> {
        self.reports
            .iter()
            .map(|r| (r.name.clone(), r.state))
            .collect()
    }

    /// Number of tasks in `state`.
    pub fn count(&self, state: TaskState) -> usize {
        self.reports.iter().filter(|r| r.state == state).count()
    }
}

/// State shared between a [`JobHandle`] and the job's runtime.
#[derive(Debug)]
pub(crate) struct JobShared {
    pub id: JobId,
    pub name: String,
    pub abort: CancellationToken,
    pub abort_reason: Mutex<Option<String>>,
    pub summary: watch::Sender<JobSummary>,
}

impl JobShared {
    pub fn new(id: JobId, name: String, reports: Vec<TaskReport>) -> Self {
        let (summary, _rx) = watch::channel(JobSummary::queued(id, name.clone(), reports));
        Self {
            id,
            name,
            abort: CancellationToken::new(),
            abort_reason: Mutex::new(None),
            summary,
        }
    }

    /// Reason given to the first abort request.
    pub fn abort_reason(&self) -> String {
        self.abort_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or_else(|| "aborted".to_string())
    }

    pub fn request_abort(&self, reason: &str) -> bool {
        if self.summary.borrow().state.is_terminal() {
            return false;
        }
        {
            let mut slot = self
                .abort_reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_none() {
                *slot = Some(reason.to_string());
            }
        }
        info!(job_id = %self.id, job = %self.name, reason, "abort requested");
        self.abort.cancel();
        true
    }
}

/// Caller-side handle to a submitted job. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    pub(crate) fn new(shared: Arc<JobShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> JobState {
        self.shared.summary.borrow().state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Current snapshot of the job.
    pub fn summary(&self) -> JobSummary {
        self.shared.summary.borrow().clone()
    }

    pub fn task_state(&self, task: &str) -> Option<TaskState> {
        self.shared.summary.borrow().task_state(task)
    }

    /// Ask the job to abort.
    ///
    /// Returns `false` if the job had already finished.
    pub fn abort(&self, reason: &str) -> bool {
        self.shared.request_abort(reason)
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(&self) -> JobSummary {
        let mut rx = self.shared.summary.subscribe();
        match rx.wait_for(|s| s.state.is_terminal()).await {
            Ok(summary) => summary.clone(),
            // The sender lives in `shared`, which we hold.
            Err(_) => self.summary(),
        }
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<JobSummary> {
        self.shared.summary.subscribe()
    }
}
