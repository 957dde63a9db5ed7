// src/transaction/memory.rs

//! In-memory persistence collaborator.
//!
//! Records are `(kind, id) -> String`. A session stages its writes and only
//! applies them to the shared table on commit, so a rolled-back or dropped
//! session leaves no trace.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail};
use tracing::trace;

use super::{Session, Store};

type Key = (String, i64);

#[derive(Debug, Default)]
struct Shared {
    rows: Mutex<BTreeMap<Key, String>>,
    next_id: AtomicI64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_next_commit: AtomicBool,
}

impl Shared {
    fn rows(&self) -> MutexGuard<'_, BTreeMap<Key, String>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared table of records. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of a record.
    pub fn get(&self, kind: &str, id: i64) -> Option<String> {
        self.shared.rows().get(&(kind.to_string(), id)).cloned()
    }

    /// Number of committed records of `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.shared.rows().keys().filter(|(k, _)| k == kind).count()
    }

    /// Make the next commit fail (once).
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn opened_sessions(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Sessions opened and not dropped yet.
    pub fn open_sessions(&self) -> usize {
        self.opened_sessions() - self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }
}

impl Store for InMemoryStore {
    type Session = InMemorySession;

    fn open(&self) -> anyhow::Result<InMemorySession> {
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(InMemorySession {
            shared: Arc::clone(&self.shared),
            staged: HashMap::new(),
            active: false,
        })
    }
}

/// One session of an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemorySession {
    shared: Arc<Shared>,
    /// `None` marks a staged delete.
    staged: HashMap<Key, Option<String>>,
    active: bool,
}

impl InMemorySession {
    fn ensure_active(&self) -> anyhow::Result<()> {
        if !self.active {
            bail!("no active transaction");
        }
        Ok(())
    }

    /// Read a record, seeing this session's own staged writes.
    pub fn find(&self, kind: &str, id: i64) -> Option<String> {
        let key = (kind.to_string(), id);
        match self.staged.get(&key) {
            Some(staged) => staged.clone(),
            None => self.shared.rows().get(&key).cloned(),
        }
    }

    /// Stage a new record and return its id.
    pub fn persist(&mut self, kind: &str, value: impl Into<String>) -> anyhow::Result<i64> {
        self.ensure_active()?;
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.staged.insert((kind.to_string(), id), Some(value.into()));
        trace!(kind, id, "staged insert");
        Ok(id)
    }

    /// Stage an update of an existing record.
    pub fn update(&mut self, kind: &str, id: i64, value: impl Into<String>) -> anyhow::Result<()> {
        self.ensure_active()?;
        if self.find(kind, id).is_none() {
            return Err(anyhow!("{kind}:{id} does not exist"));
        }
        self.staged.insert((kind.to_string(), id), Some(value.into()));
        trace!(kind, id, "staged update");
        Ok(())
    }

    /// Stage a delete. Deleting a missing record is an error.
    pub fn delete(&mut self, kind: &str, id: i64) -> anyhow::Result<()> {
        self.ensure_active()?;
        if self.find(kind, id).is_none() {
            return Err(anyhow!("{kind}:{id} does not exist"));
        }
        self.staged.insert((kind.to_string(), id), None);
        trace!(kind, id, "staged delete");
        Ok(())
    }
}

impl Session for InMemorySession {
    fn begin(&mut self) -> anyhow::Result<()> {
        if self.active {
            bail!("transaction already active");
        }
        self.active = true;
        self.staged.clear();
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        self.ensure_active()?;
        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            bail!("commit rejected by store");
        }

        let mut rows = self.shared.rows();
        for (key, value) in self.staged.drain() {
            match value {
                Some(value) => {
                    rows.insert(key, value);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        self.active = false;
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> anyhow::Result<()> {
        self.staged.clear();
        self.active = false;
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}
