// src/lock/manager.rs

//! Engine-wide lock table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::dag::TaskId;
use crate::engine::JobId;
use crate::lock::reference::{LockObjectReference, LockSet};

/// The task currently holding a lock object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner {
    pub job_id: JobId,
    pub task_id: TaskId,
}

/// A candidate task could not take its lock set because `reference` is held
/// by `holder`. The task is deferred and retried after the next release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockContention {
    pub reference: LockObjectReference,
    pub holder: LockOwner,
}

/// Table of held [`LockObjectReference`]s shared by every job of an engine.
///
/// Every release bumps a generation counter published on a `watch` channel,
/// so job loops with deferred tasks can wait for "some lock was released"
/// without missing a wakeup between their last attempt and their wait.
#[derive(Debug)]
pub struct LockManager {
    held: Mutex<HashMap<LockObjectReference, LockOwner>>,
    released: watch::Sender<u64>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        let (released, _rx) = watch::channel(0);
        Self {
            held: Mutex::new(HashMap::new()),
            released,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<LockObjectReference, LockOwner>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take every reference in `refs` for `owner`, or none of them.
    ///
    /// References already held by the same owner count as available.
    pub fn try_acquire(&self, owner: LockOwner, refs: &LockSet) -> Result<(), LockContention> {
        if refs.is_empty() {
            return Ok(());
        }

        let mut table = self.table();

        for reference in refs {
            if let Some(holder) = table.get(reference) {
                if *holder != owner {
                    return Err(LockContention {
                        reference: reference.clone(),
                        holder: *holder,
                    });
                }
            }
        }

        for reference in refs {
            table.insert(reference.clone(), owner);
            trace!(lock = %reference, job_id = %owner.job_id, task_id = %owner.task_id, "lock acquired");
        }

        Ok(())
    }

    /// Release the references in `refs` that are held by `owner`.
    pub fn release(&self, owner: LockOwner, refs: &LockSet) {
        if refs.is_empty() {
            return;
        }

        let mut released_any = false;
        {
            let mut table = self.table();
            for reference in refs {
                match table.get(reference) {
                    Some(holder) if *holder == owner => {
                        table.remove(reference);
                        released_any = true;
                    }
                    Some(holder) => {
                        warn!(
                            lock = %reference,
                            holder_task = %holder.task_id,
                            task_id = %owner.task_id,
                            "release requested by a task that does not hold the lock; ignoring"
                        );
                    }
                    None => {
                        debug!(lock = %reference, task_id = %owner.task_id, "release of a lock that is not held");
                    }
                }
            }
        }

        if released_any {
            self.released.send_modify(|generation| *generation += 1);
        }
    }

    /// Current holder of `reference`, if any.
    pub fn holder(&self, reference: &LockObjectReference) -> Option<LockOwner> {
        self.table().get(reference).copied()
    }

    /// Number of references currently held.
    pub fn held_count(&self) -> usize {
        self.table().len()
    }

    /// Receiver notified after every release.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.released.subscribe()
    }
}
