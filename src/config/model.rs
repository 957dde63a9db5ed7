// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::{DEFAULT_JOB_POOL_SIZE, DEFAULT_TASK_POOL_SIZE, EngineConfig};
use crate::lock::LockSet;
use crate::types::TaskGuard;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// task_pool_size = 40
/// job_pool_size = 10
///
/// [job]
/// name = "propagate"
///
/// [task.lock_da]
/// locks = ["DistributedAppliance:7"]
///
/// [task.upload]
/// after = ["lock_da"]
/// sleep_ms = 200
///
/// [task.unlock_da]
/// after = ["upload"]
/// guard = "all_predecessors_completed"
/// ```
///
/// All sections are optional and have reasonable defaults, but validation
/// requires at least one task.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub job: JobSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, RawTaskConfig>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub job: JobSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        engine: EngineSection,
        job: JobSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self { engine, job, task }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            task_pool_size: self.engine.task_pool_size,
            job_pool_size: self.engine.job_pool_size,
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EngineSection {
    /// Worker threads running task bodies.
    #[serde(default = "default_task_pool_size")]
    pub task_pool_size: usize,

    /// Jobs running at the same time; later submissions wait for a slot.
    #[serde(default = "default_job_pool_size")]
    pub job_pool_size: usize,
}

fn default_task_pool_size() -> usize {
    DEFAULT_TASK_POOL_SIZE
}

fn default_job_pool_size() -> usize {
    DEFAULT_JOB_POOL_SIZE
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            task_pool_size: default_task_pool_size(),
            job_pool_size: default_job_pool_size(),
        }
    }
}

/// `[job]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    #[serde(default = "default_job_name")]
    pub name: String,
}

fn default_job_name() -> String {
    "jobgraph".to_string()
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            name: default_job_name(),
        }
    }
}

/// `[task.<name>]` section as written.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTaskConfig {
    /// This task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// `"all_predecessors_succeeded"` (default), `"all_predecessors_completed"`
    /// or `"all_ancestors_succeeded"`.
    #[serde(default)]
    pub guard: TaskGuard,

    /// Lock objects as `"Kind:id"` strings.
    #[serde(default)]
    pub locks: Vec<String>,

    /// How long the scripted body runs.
    #[serde(default)]
    pub sleep_ms: u64,

    /// Make the scripted body fail.
    #[serde(default)]
    pub fail: bool,

    #[serde(default)]
    pub fail_message: Option<String>,
}

/// `[task.<name>]` section after validation.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub after: Vec<String>,
    pub guard: TaskGuard,
    pub locks: LockSet,
    pub sleep_ms: u64,
    pub fail: bool,
    pub fail_message: Option<String>,
}
