// src/exec/task_runner.rs

//! Individual task body runner.

use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::dag::{ScheduledTask, TaskCompletion, TaskRef};
use crate::errors::TaskError;

/// Run a single task body on the current thread and describe how it ended.
///
/// - A body is never started once the job has been aborted; it completes
///   with [`TaskError::Aborted`] instead.
/// - Outputs the body published are only carried over when it passed.
pub fn run_task(task: &ScheduledTask) -> TaskCompletion {
    let span = info_span!("task", job_id = %task.job_id, task_id = %task.task_id, task = %task.name);
    let _guard = span.enter();

    if task.context.is_aborted() {
        debug!("job aborted before the task started; not running it");
        return TaskCompletion::failed(task.task_id, TaskError::Aborted);
    }

    info!(meta = task.task.is_meta(), locks = task.locks.len(), "starting task");
    let started = Instant::now();

    let result = match &task.task {
        TaskRef::Task(body) => body.execute(&task.context).map(|()| None),
        TaskRef::Meta(body) => body.execute(&task.context).map(Some),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(Some(graph)) => {
            info!(elapsed_ms, expansion = graph.len(), "meta task finished")
        }
        Ok(None) => info!(elapsed_ms, "task finished"),
        Err(err) => warn!(elapsed_ms, error = %err, "task body returned an error"),
    }

    let outputs = if result.is_ok() {
        task.context.take_outputs()
    } else {
        Default::default()
    };

    TaskCompletion {
        task_id: task.task_id,
        result,
        outputs,
    }
}
