// src/dag/scheduler_step.rs

//! Step-by-step result type for the scheduler.

use crate::dag::task::TaskId;

/// Structured result of a single scheduler "step".
///
/// The job runtime turns `changed` into observer notifications; tests use the
/// finer-grained lists to assert on what a step did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Every node whose state changed in this step, in the order it changed.
    pub changed: Vec<TaskId>,
    /// Nodes that moved to `Queued` (waiting for locks / a worker).
    pub newly_queued: Vec<TaskId>,
    /// Nodes that moved to `Skipped`.
    pub newly_skipped: Vec<TaskId>,
    /// Nodes created by a meta task expansion in this step.
    pub inserted: Vec<TaskId>,
    /// Whether this step left the job with no pending, queued or running task.
    pub job_just_finished: bool,
}

impl SchedulerStep {
    pub(crate) fn merge(&mut self, other: SchedulerStep) {
        self.changed.extend(other.changed);
        self.newly_queued.extend(other.newly_queued);
        self.newly_skipped.extend(other.newly_skipped);
        self.inserted.extend(other.inserted);
        self.job_just_finished |= other.job_just_finished;
    }
}
