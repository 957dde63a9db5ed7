// src/propagate.rs

//! Manager-file propagation to distributed appliance instances (DAIs).
//!
//! [`PropagateFileMetaTask`] looks up the current DAIs of a virtual system
//! through a [`DaiDirectory`] and expands into one [`UploadToDaiTask`] per
//! DAI. Each upload locks its DAI and pushes the file through the DAI's
//! [`AgentClient`]. Uploads are independent: one failing DAI does not stop
//! the others.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dag::{MetaTask, Schedulable, Task, TaskContext, TaskGraph};
use crate::errors::TaskError;
use crate::lock::{LockObjectReference, LockSet, Lockable, kinds};

/// Output key under which the meta task publishes the number of targets.
pub const TARGET_COUNT_OUTPUT: &str = "propagate.targets";

/// Remote agent running on one DAI.
pub trait AgentClient: Send + Sync + 'static {
    /// Upload `bytes` as file `name`. Blocks until the agent answers.
    fn upload(&self, bytes: &[u8], name: &str) -> anyhow::Result<()>;
}

/// One distributed appliance instance and its agent.
#[derive(Clone)]
pub struct Dai {
    pub id: i64,
    pub name: String,
    pub agent: Arc<dyn AgentClient>,
}

impl fmt::Debug for Dai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dai")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Lockable for Dai {
    fn kind(&self) -> &str {
        kinds::DISTRIBUTED_APPLIANCE_INSTANCE
    }

    fn id(&self) -> i64 {
        self.id
    }
}

/// Lookup of the DAIs currently deployed for a virtual system.
pub trait DaiDirectory: Send + Sync + 'static {
    fn current_dais(&self, virtual_system: &str) -> anyhow::Result<Vec<Dai>>;
}

/// Shared file payload.
#[derive(Debug, Clone)]
pub struct ManagerFile {
    pub name: String,
    pub bytes: Arc<Vec<u8>>,
}

impl ManagerFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: Arc::new(bytes.into()),
        }
    }
}

/// Uploads a manager file to one DAI.
#[derive(Debug, Clone)]
pub struct UploadToDaiTask {
    dai: Dai,
    file: ManagerFile,
}

impl UploadToDaiTask {
    pub fn new(dai: Dai, file: ManagerFile) -> Self {
        Self { dai, file }
    }
}

impl Schedulable for UploadToDaiTask {
    fn name(&self) -> String {
        format!("Upload '{}' to DAI '{}'", self.file.name, self.dai.name)
    }

    fn lock_objects(&self) -> LockSet {
        LockSet::from([LockObjectReference::of(&self.dai)])
    }
}

impl Task for UploadToDaiTask {
    fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.check_aborted()?;
        debug!(dai = %self.dai.name, file = %self.file.name, bytes = self.file.bytes.len(), "uploading manager file");

        self.dai
            .agent
            .upload(&self.file.bytes, &self.file.name)
            .map_err(|e| {
                TaskError::execution(format!(
                    "upload of '{}' to DAI '{}' failed: {e:#}",
                    self.file.name, self.dai.name
                ))
            })
    }
}

/// Expands into one [`UploadToDaiTask`] per DAI of a virtual system.
pub struct PropagateFileMetaTask {
    virtual_system: String,
    file: ManagerFile,
    directory: Arc<dyn DaiDirectory>,
    /// Restrict to these DAI names; every DAI when empty.
    only: BTreeSet<String>,
    locks: LockSet,
}

impl fmt::Debug for PropagateFileMetaTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagateFileMetaTask")
            .field("virtual_system", &self.virtual_system)
            .field("file", &self.file.name)
            .field("only", &self.only)
            .finish_non_exhaustive()
    }
}

impl PropagateFileMetaTask {
    pub fn new(
        virtual_system: impl Into<String>,
        file: ManagerFile,
        directory: Arc<dyn DaiDirectory>,
    ) -> Self {
        Self {
            virtual_system: virtual_system.into(),
            file,
            directory,
            only: BTreeSet::new(),
            locks: LockSet::new(),
        }
    }

    /// Only propagate to the named DAIs. Naming a DAI the virtual system does
    /// not have fails the task.
    pub fn only_dais<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_locks(mut self, locks: LockSet) -> Self {
        self.locks = locks;
        self
    }
}

impl Schedulable for PropagateFileMetaTask {
    fn name(&self) -> String {
        format!(
            "Propagate '{}' to DAIs of '{}'",
            self.file.name, self.virtual_system
        )
    }

    fn lock_objects(&self) -> LockSet {
        self.locks.clone()
    }
}

impl MetaTask for PropagateFileMetaTask {
    fn execute(&self, ctx: &TaskContext) -> Result<TaskGraph, TaskError> {
        ctx.check_aborted()?;

        if self.file.name.trim().is_empty() {
            return Err(TaskError::execution("invalid manager file name"));
        }

        let dais = self.directory.current_dais(&self.virtual_system).map_err(|e| {
            TaskError::execution(format!(
                "cannot list DAIs of '{}': {e:#}",
                self.virtual_system
            ))
        })?;

        let targets: Vec<Dai> = if self.only.is_empty() {
            dais
        } else {
            let known: BTreeSet<&str> = dais.iter().map(|d| d.name.as_str()).collect();
            if let Some(missing) = self.only.iter().find(|n| !known.contains(n.as_str())) {
                return Err(TaskError::execution(format!(
                    "DAI '{missing}' is not a member of '{}'",
                    self.virtual_system
                )));
            }
            dais.into_iter()
                .filter(|d| self.only.contains(&d.name))
                .collect()
        };

        let mut graph = TaskGraph::new();
        for dai in &targets {
            graph.add_task(UploadToDaiTask::new(dai.clone(), self.file.clone()));
        }

        info!(
            virtual_system = %self.virtual_system,
            file = %self.file.name,
            targets = targets.len(),
            "propagating manager file"
        );
        ctx.set_output(TARGET_COUNT_OUTPUT, targets.len());

        Ok(graph)
    }
}
