// src/exec/mod.rs

//! Task execution layer.
//!
//! This module actually runs task bodies and reports back to the job
//! runtime via [`crate::dag::TaskCompletion`]s.
//!
//! - [`task_runner`] runs one task body and turns its result into a
//!   completion.
//! - [`backend`] provides the `TaskExecutor` trait and the concrete
//!   `PooledExecutor` the engine uses in production, and which tests can
//!   replace with a fake implementation.

pub mod backend;
pub mod task_runner;

pub use backend::{PooledExecutor, TaskExecutor};
pub use task_runner::run_task;
