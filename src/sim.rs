// src/sim.rs

//! Scripted tasks for the CLI driver.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::model::{ConfigFile, TaskConfig};
use crate::config::validate::dependency_order;
use crate::dag::{Schedulable, Task, TaskContext, TaskGraph, TaskId, TaskRef};
use crate::errors::{JobgraphError, Result, TaskError};
use crate::lock::LockSet;

const ABORT_POLL: Duration = Duration::from_millis(10);

/// A task that sleeps, then passes or fails as configured.
///
/// Sleeping is done in short slices so an abort is noticed quickly.
#[derive(Debug, Clone)]
pub struct ScriptedTask {
    name: String,
    locks: LockSet,
    sleep: Duration,
    fail: Option<String>,
}

impl ScriptedTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locks: LockSet::new(),
            sleep: Duration::ZERO,
            fail: None,
        }
    }

    pub fn from_config(name: &str, cfg: &TaskConfig) -> Self {
        let mut task = Self::new(name)
            .with_locks(cfg.locks.clone())
            .with_sleep(Duration::from_millis(cfg.sleep_ms));
        if cfg.fail {
            let message = cfg
                .fail_message
                .clone()
                .unwrap_or_else(|| format!("task '{name}' failed as scripted"));
            task = task.failing(message);
        }
        task
    }

    pub fn with_locks(mut self, locks: LockSet) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail = Some(message.into());
        self
    }
}

impl Schedulable for ScriptedTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn lock_objects(&self) -> LockSet {
        self.locks.clone()
    }
}

impl Task for ScriptedTask {
    fn execute(&self, ctx: &TaskContext) -> std::result::Result<(), TaskError> {
        let deadline = Instant::now() + self.sleep;
        loop {
            ctx.check_aborted()?;
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(ABORT_POLL.min(deadline - now));
        }

        match &self.fail {
            Some(message) => Err(TaskError::execution(message.clone())),
            None => {
                debug!(task = %self.name, "scripted task done");
                Ok(())
            }
        }
    }
}

/// Build the job graph described by a validated config: one [`ScriptedTask`]
/// per `[task.<name>]`, with an edge from every `after` entry.
pub fn graph_from_config(cfg: &ConfigFile) -> Result<TaskGraph> {
    let mut graph = TaskGraph::new();
    let mut ids: HashMap<&str, TaskId> = HashMap::new();

    let order = dependency_order(cfg)?;
    for name in &order {
        let (key, task_cfg) = cfg
            .task
            .get_key_value(name.as_str())
            .ok_or_else(|| JobgraphError::TaskNotFound(name.clone()))?;

        let mut preds = Vec::with_capacity(task_cfg.after.len());
        for dep in &task_cfg.after {
            let id = ids
                .get(dep.as_str())
                .copied()
                .ok_or_else(|| JobgraphError::TaskNotFound(dep.clone()))?;
            preds.push(id);
        }

        let task = TaskRef::task(ScriptedTask::from_config(key, task_cfg));
        let id = graph.add_task_after(task, task_cfg.guard, &preds)?;
        ids.insert(key.as_str(), id);
    }

    Ok(graph)
}
