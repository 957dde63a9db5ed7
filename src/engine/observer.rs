// src/engine/observer.rs

//! Status callbacks.

use crate::dag::TaskReport;
use crate::engine::{JobId, JobSummary};

/// Receives task transitions and job completion.
///
/// Called inline from the job's runtime, so implementations should return
/// quickly. Every transition is reported, `Skipped` and `Aborted` included,
/// so a status view stays consistent with the graph.
pub trait JobObserver: Send + Sync + 'static {
    fn task_changed(&self, _job: JobId, _report: &TaskReport) {}

    fn job_completed(&self, _summary: &JobSummary) {}
}
