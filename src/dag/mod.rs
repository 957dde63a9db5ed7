// src/dag/mod.rs

//! Task graphs and per-job scheduling.
//!
//! - [`task`] defines the task traits, ids and the execution context.
//! - [`graph`] holds the directed acyclic graph of tasks and its composition
//!   operations.
//! - [`scheduler`] contains the per-job state machine that decides which
//!   tasks are ready, hands them out under their locks and records outcomes.
//! - [`state_manager`] applies guard evaluation and skip propagation.
//! - [`task_info`] provides run state, dispatch and report types.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub(crate) mod state_manager;
pub mod task;
pub mod task_info;

pub use graph::TaskGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task::{MetaTask, Schedulable, Task, TaskContext, TaskId, TaskOutputs, TaskRef};
pub use task_info::{ScheduledTask, TaskCompletion, TaskReport};
