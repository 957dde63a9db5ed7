use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Condition a task's predecessors must meet before the task is executed.
///
/// The guard is evaluated once every predecessor has reached a terminal
/// state. A task whose guard is not met is marked `Skipped` instead of run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGuard {
    /// Every direct predecessor must have passed (default).
    AllPredecessorsSucceeded,
    /// Every direct predecessor must be terminal, whatever its outcome.
    AllPredecessorsCompleted,
    /// Every ancestor, direct or not, must have passed.
    AllAncestorsSucceeded,
}

impl Default for TaskGuard {
    fn default() -> Self {
        TaskGuard::AllPredecessorsSucceeded
    }
}

impl FromStr for TaskGuard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all_predecessors_succeeded" => Ok(TaskGuard::AllPredecessorsSucceeded),
            "all_predecessors_completed" => Ok(TaskGuard::AllPredecessorsCompleted),
            "all_ancestors_succeeded" => Ok(TaskGuard::AllAncestorsSucceeded),
            other => Err(format!(
                "invalid guard: {other} (expected \"all_predecessors_succeeded\", \
                 \"all_predecessors_completed\" or \"all_ancestors_succeeded\")"
            )),
        }
    }
}

/// Per-task state within one job.
///
/// `Pending -> Queued -> Running -> {Passed, Failed, Aborted}`, or
/// `Pending -> Skipped` when an upstream task did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting on predecessors.
    Pending,
    /// Predecessors satisfied; waiting for its lock objects or a worker.
    Queued,
    Running,
    Passed,
    Failed,
    Skipped,
    Aborted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Passed | TaskState::Failed | TaskState::Skipped | TaskState::Aborted
        )
    }

    /// `Failed` or `Aborted`: the states that fail the job.
    pub fn is_failure(self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Aborted)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Queued => "QUEUED",
            TaskState::Running => "RUNNING",
            TaskState::Passed => "PASSED",
            TaskState::Failed => "FAILED",
            TaskState::Skipped => "SKIPPED",
            TaskState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Submitted, waiting for a job slot.
    Queued,
    Running,
    /// Every task is terminal and none failed.
    Completed,
    /// At least one task ended `Failed` or `Aborted`.
    Failed,
    /// The job was aborted on request.
    Aborted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Aborted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}
