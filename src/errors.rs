// src/errors.rs

//! Crate-wide error types.
//!
//! - [`JobgraphError`] is what the public API returns (config, engine, graph).
//! - [`GraphError`] covers task graph construction mistakes; these are
//!   programming errors and are surfaced immediately.
//! - [`TaskError`] is what a task body returns. The engine records it against
//!   the task and never propagates it past the job boundary.

use thiserror::Error;

use crate::dag::TaskId;

#[derive(Error, Debug)]
pub enum JobgraphError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("job engine is shutting down; cannot accept job '{0}'")]
    EngineShutdown(String),

    #[error("Job not found: {0}")]
    JobNotFound(u64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while building or splicing a [`crate::dag::TaskGraph`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Adding `before -> after` would close a cycle.
    #[error("edge {before} -> {after} would create a cycle")]
    Cycle { before: TaskId, after: TaskId },

    #[error("task '{name}' is already part of this graph (as {existing})")]
    DuplicateTask { name: String, existing: TaskId },

    #[error("unknown task {0}")]
    UnknownTask(TaskId),
}

/// Failure of a single task body.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Business logic failed.
    #[error("{0}")]
    Execution(String),

    /// Begin/commit of the task's transaction failed; the work was rolled back.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The task observed the job's abort signal and stopped.
    #[error("task aborted")]
    Aborted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn execution(msg: impl Into<String>) -> Self {
        TaskError::Execution(msg.into())
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobgraphError>;
