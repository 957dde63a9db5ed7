// src/dag/task.rs

//! Task abstractions.
//!
//! A [`Task`] is a unit of work; a [`MetaTask`] is a unit of work whose
//! successful execution yields a further [`TaskGraph`] that the engine splices
//! in right after it. Both share [`Schedulable`] (name + lock set). Graph
//! nodes hold either kind behind a [`TaskRef`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::dag::TaskGraph;
use crate::engine::JobId;
use crate::errors::TaskError;
use crate::lock::LockSet;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a node in a task graph.
///
/// Ids are process-unique, so a node keeps its id when its graph is spliced
/// into another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Name and lock requirements shared by [`Task`] and [`MetaTask`].
pub trait Schedulable: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Entities this task must hold exclusively while it runs.
    ///
    /// Read once, when the task is added to a graph.
    fn lock_objects(&self) -> LockSet {
        LockSet::new()
    }
}

/// A unit of work.
///
/// `execute` may block (e.g. on a remote agent); it runs on a worker thread.
/// Long-running bodies should poll [`TaskContext::check_aborted`] at safe
/// points.
pub trait Task: Schedulable {
    fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError>;
}

/// A unit of work that produces more work.
///
/// The returned graph is spliced after this task and before this task's own
/// successors. An empty graph means no expansion. The graph is only looked at
/// when `execute` succeeds.
pub trait MetaTask: Schedulable {
    fn execute(&self, ctx: &TaskContext) -> Result<TaskGraph, TaskError>;
}

/// Shared handle to a task of either kind.
#[derive(Clone)]
pub enum TaskRef {
    Task(Arc<dyn Task>),
    Meta(Arc<dyn MetaTask>),
}

impl TaskRef {
    pub fn task(task: impl Task) -> Self {
        TaskRef::Task(Arc::new(task))
    }

    pub fn meta(task: impl MetaTask) -> Self {
        TaskRef::Meta(Arc::new(task))
    }

    pub fn name(&self) -> String {
        match self {
            TaskRef::Task(t) => t.name(),
            TaskRef::Meta(t) => t.name(),
        }
    }

    pub fn lock_objects(&self) -> LockSet {
        match self {
            TaskRef::Task(t) => t.lock_objects(),
            TaskRef::Meta(t) => t.lock_objects(),
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, TaskRef::Meta(_))
    }

    /// Address of the shared task object; equal for clones of the same handle.
    pub(crate) fn identity(&self) -> usize {
        match self {
            TaskRef::Task(t) => Arc::as_ptr(t) as *const () as usize,
            TaskRef::Meta(t) => Arc::as_ptr(t) as *const () as usize,
        }
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_meta() { "Meta" } else { "Task" };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}

impl From<Arc<dyn Task>> for TaskRef {
    fn from(task: Arc<dyn Task>) -> Self {
        TaskRef::Task(task)
    }
}

impl From<Arc<dyn MetaTask>> for TaskRef {
    fn from(task: Arc<dyn MetaTask>) -> Self {
        TaskRef::Meta(task)
    }
}

/// Named values published by a passed task.
pub type TaskOutputs = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Everything a task body gets to see while it runs.
pub struct TaskContext {
    job_id: JobId,
    task_id: TaskId,
    task_name: String,
    abort: CancellationToken,
    /// Outputs of upstream tasks, nearest predecessors first.
    upstream: Vec<(TaskId, Arc<TaskOutputs>)>,
    outputs: Mutex<TaskOutputs>,
    broadcaster: Option<Broadcaster>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("job_id", &self.job_id)
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .field("aborted", &self.abort.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    pub fn new(
        job_id: JobId,
        task_id: TaskId,
        task_name: impl Into<String>,
        abort: CancellationToken,
        upstream: Vec<(TaskId, Arc<TaskOutputs>)>,
    ) -> Self {
        Self {
            job_id,
            task_id,
            task_name: task_name.into(),
            abort,
            upstream,
            outputs: Mutex::new(TaskOutputs::new()),
            broadcaster: None,
        }
    }

    /// Attach the broadcaster post-commit notifications go to.
    pub fn with_broadcaster(mut self, broadcaster: Broadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Context for running a task body outside of an engine (tests, tools).
    pub fn detached(task_name: impl Into<String>) -> Self {
        Self::new(
            JobId::detached(),
            TaskId::next(),
            task_name,
            CancellationToken::new(),
            Vec::new(),
        )
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Whether the job has been asked to abort.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// `Err(TaskError::Aborted)` once the job has been asked to abort.
    pub fn check_aborted(&self) -> Result<(), TaskError> {
        if self.is_aborted() {
            Err(TaskError::Aborted)
        } else {
            Ok(())
        }
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    pub fn broadcaster(&self) -> Option<&Broadcaster> {
        self.broadcaster.as_ref()
    }

    /// Look up a value published by an upstream task.
    ///
    /// Direct predecessors are searched before more distant ancestors.
    pub fn input<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.upstream
            .iter()
            .filter_map(|(_, outputs)| outputs.get(key))
            .find_map(|value| value.downcast_ref::<T>().cloned())
    }

    /// Publish a value for downstream tasks. Kept only if this task passes.
    pub fn set_output<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let mut outputs = self.outputs.lock().unwrap_or_else(|p| p.into_inner());
        outputs.insert(key.into(), Arc::new(value));
    }

    pub(crate) fn take_outputs(&self) -> TaskOutputs {
        let mut outputs = self.outputs.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *outputs)
    }
}
