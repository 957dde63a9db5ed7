// src/dag/task_info.rs

//! Per-node run state, dispatch descriptors and reports.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dag::TaskGraph;
use crate::dag::task::{TaskContext, TaskId, TaskOutputs, TaskRef};
use crate::engine::JobId;
use crate::errors::TaskError;
use crate::lock::LockSet;
use crate::types::{TaskGuard, TaskState};

/// Per-run state of one node (internal).
#[derive(Debug, Clone)]
pub(crate) struct NodeRun {
    pub state: TaskState,
    pub error: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Outputs published by the task; only filled in when it passed.
    pub outputs: Arc<TaskOutputs>,
}

impl NodeRun {
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            error: None,
            queued_at: None,
            started_at: None,
            completed_at: None,
            outputs: Arc::new(TaskOutputs::new()),
        }
    }

    /// Move to a terminal state, stamping the completion time.
    pub fn finish(&mut self, state: TaskState, error: Option<String>) {
        self.state = state;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }
}

/// Read-only view of one task of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub guard: TaskGuard,
    /// Error text for `Failed` (and `Aborted`, when the body returned one).
    pub error: Option<String>,
    /// Meta task whose expansion created this node.
    pub producer: Option<TaskId>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A task the scheduler wants the executor to run now.
///
/// Its lock set is already held on behalf of `(job_id, task_id)`.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub name: String,
    pub task: TaskRef,
    pub locks: LockSet,
    pub context: Arc<TaskContext>,
}

/// What came back from running a [`ScheduledTask`].
#[derive(Debug)]
pub struct TaskCompletion {
    pub task_id: TaskId,
    /// `Ok(Some(graph))` for a meta task that expanded.
    pub result: Result<Option<TaskGraph>, TaskError>,
    pub outputs: TaskOutputs,
}

impl TaskCompletion {
    pub fn passed(task_id: TaskId) -> Self {
        Self {
            task_id,
            result: Ok(None),
            outputs: TaskOutputs::new(),
        }
    }

    pub fn failed(task_id: TaskId, error: TaskError) -> Self {
        Self {
            task_id,
            result: Err(error),
            outputs: TaskOutputs::new(),
        }
    }
}
