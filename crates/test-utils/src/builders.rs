#![allow(dead_code)]

use std::collections::BTreeMap;

use jobgraph::config::{ConfigFile, EngineSection, JobSection, RawConfigFile, RawTaskConfig};
use jobgraph::types::TaskGuard;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                engine: EngineSection::default(),
                job: JobSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn job_name(mut self, name: &str) -> Self {
        self.config.job.name = name.to_string();
        self
    }

    pub fn task_pool_size(mut self, size: usize) -> Self {
        self.config.engine.task_pool_size = size;
        self
    }

    pub fn job_pool_size(mut self, size: usize) -> Self {
        self.config.engine.job_pool_size = size;
        self
    }

    pub fn with_task(mut self, name: &str, task: RawTaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    /// The unvalidated config, for tests that expect validation to fail.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `RawTaskConfig`.
pub struct TaskConfigBuilder {
    task: RawTaskConfig,
}

impl TaskConfigBuilder {
    pub fn new() -> Self {
        Self {
            task: RawTaskConfig {
                after: vec![],
                guard: TaskGuard::default(),
                locks: vec![],
                sleep_ms: 0,
                fail: false,
                fail_message: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn guard(mut self, guard: TaskGuard) -> Self {
        self.task.guard = guard;
        self
    }

    pub fn lock(mut self, reference: &str) -> Self {
        self.task.locks.push(reference.to_string());
        self
    }

    pub fn sleep_ms(mut self, ms: u64) -> Self {
        self.task.sleep_ms = ms;
        self
    }

    pub fn fail(mut self, message: &str) -> Self {
        self.task.fail = true;
        self.task.fail_message = Some(message.to_string());
        self
    }

    pub fn build(self) -> RawTaskConfig {
        self.task
    }
}

impl Default for TaskConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
