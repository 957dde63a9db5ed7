// src/transaction/mod.rs

//! Transactional execution of task bodies.
//!
//! [`run_transactional`] opens a session from a [`Store`], begins a
//! transaction, runs the work closure, commits and only then hands the change
//! notifications the work queued to the [`Broadcaster`]. Any failure rolls the
//! transaction back and drops the queued notifications. The session is closed
//! when it goes out of scope, whatever the outcome.
//!
//! [`TransactionalTask`] and [`TransactionalMetaTask`] adapt a closure into a
//! [`Task`] / [`MetaTask`] that runs through this wrapper.

pub mod memory;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::broadcast::{BroadcastMessage, Broadcaster, EventType};
use crate::dag::{MetaTask, Schedulable, Task, TaskContext, TaskGraph};
use crate::errors::TaskError;
use crate::lock::LockSet;

pub use memory::{InMemorySession, InMemoryStore};

/// Source of sessions (the persistence collaborator).
pub trait Store: Send + Sync + 'static {
    type Session: Session;

    /// Open a fresh session. Sessions are never shared between tasks.
    fn open(&self) -> anyhow::Result<Self::Session>;
}

/// One session against a [`Store`]. Dropping it closes it; work that was not
/// committed must not survive the drop.
pub trait Session: Send {
    fn begin(&mut self) -> anyhow::Result<()>;
    fn commit(&mut self) -> anyhow::Result<()>;
    fn rollback(&mut self) -> anyhow::Result<()>;
}

/// Session plus the notifications to send once it commits.
pub struct Transaction<'s, S: Session> {
    session: &'s mut S,
    pending: Vec<BroadcastMessage>,
}

impl<'s, S: Session> Transaction<'s, S> {
    fn new(session: &'s mut S) -> Self {
        Self {
            session,
            pending: Vec::new(),
        }
    }

    /// Queue a notification; it is sent only if the transaction commits.
    pub fn notify(&mut self, entity_id: i64, receiver: impl Into<String>, event: EventType) {
        self.pending
            .push(BroadcastMessage::new(entity_id, receiver, event));
    }

    pub fn pending_broadcasts(&self) -> &[BroadcastMessage] {
        &self.pending
    }

    fn into_pending(self) -> Vec<BroadcastMessage> {
        self.pending
    }
}

impl<S: Session> Deref for Transaction<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session
    }
}

impl<S: Session> DerefMut for Transaction<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session
    }
}

impl<S: Session> fmt::Debug for Transaction<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

fn transaction_error(stage: &str, err: anyhow::Error) -> TaskError {
    TaskError::Transaction(format!("{stage}: {err:#}"))
}

/// Run `work` inside one transaction of a fresh session from `store`.
///
/// - open/begin/commit failures come back as [`TaskError::Transaction`];
/// - errors from `work` come back unchanged, after rollback;
/// - a panic in `work` rolls back, then resumes unwinding;
/// - queued notifications go to `broadcaster` after the commit succeeds, and
///   nowhere otherwise.
pub fn run_transactional<St, T, F>(
    store: &St,
    broadcaster: Option<&Broadcaster>,
    work: F,
) -> Result<T, TaskError>
where
    St: Store + ?Sized,
    F: FnOnce(&mut Transaction<'_, St::Session>) -> Result<T, TaskError>,
{
    let mut session = store.open().map_err(|e| transaction_error("open", e))?;
    session
        .begin()
        .map_err(|e| transaction_error("begin", e))?;

    let mut tx = Transaction::new(&mut session);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut tx)));
    let pending = tx.into_pending();

    let value = match outcome {
        Ok(Ok(value)) => value,
        Err(payload) => {
            warn!(discarded = pending.len(), "transaction body panicked; rolling back");
            rollback(&mut session);
            panic::resume_unwind(payload);
        }
        Ok(Err(err)) => {
            warn!(error = %err, discarded = pending.len(), "transaction body failed; rolling back");
            rollback(&mut session);
            return Err(err);
        }
    };

    if let Err(err) = session.commit() {
        warn!(error = %format!("{err:#}"), discarded = pending.len(), "commit failed; rolling back");
        rollback(&mut session);
        return Err(transaction_error("commit", err));
    }

    debug!(broadcasts = pending.len(), "transaction committed");
    match broadcaster {
        Some(broadcaster) => {
            for message in pending {
                broadcaster.broadcast(message);
            }
        }
        None if !pending.is_empty() => {
            debug!(dropped = pending.len(), "no broadcaster attached; dropping notifications");
        }
        None => {}
    }

    Ok(value)
}

fn rollback<S: Session>(session: &mut S) {
    if let Err(err) = session.rollback() {
        warn!(error = %format!("{err:#}"), "rollback failed");
    }
}

/// A [`Task`] whose body runs inside [`run_transactional`].
pub struct TransactionalTask<St, F> {
    name: String,
    locks: LockSet,
    store: Arc<St>,
    work: F,
}

impl<St, F> TransactionalTask<St, F>
where
    St: Store,
    F: Fn(&mut Transaction<'_, St::Session>, &TaskContext) -> Result<(), TaskError>
        + Send
        + Sync
        + 'static,
{
    pub fn new(name: impl Into<String>, store: Arc<St>, work: F) -> Self {
        Self {
            name: name.into(),
            locks: LockSet::new(),
            store,
            work,
        }
    }

    pub fn with_locks(mut self, locks: LockSet) -> Self {
        self.locks = locks;
        self
    }
}

impl<St, F> Schedulable for TransactionalTask<St, F>
where
    St: Store,
    F: Send + Sync + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn lock_objects(&self) -> LockSet {
        self.locks.clone()
    }
}

impl<St, F> Task for TransactionalTask<St, F>
where
    St: Store,
    F: Fn(&mut Transaction<'_, St::Session>, &TaskContext) -> Result<(), TaskError>
        + Send
        + Sync
        + 'static,
{
    fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.check_aborted()?;
        run_transactional(&*self.store, ctx.broadcaster(), |tx| (self.work)(tx, ctx))
    }
}

/// A [`MetaTask`] whose body, and the graph it builds, runs inside
/// [`run_transactional`]. The graph is only used if the commit succeeds.
pub struct TransactionalMetaTask<St, F> {
    name: String,
    locks: LockSet,
    store: Arc<St>,
    work: F,
}

impl<St, F> TransactionalMetaTask<St, F>
where
    St: Store,
    F: Fn(&mut Transaction<'_, St::Session>, &TaskContext) -> Result<TaskGraph, TaskError>
        + Send
        + Sync
        + 'static,
{
    pub fn new(name: impl Into<String>, store: Arc<St>, work: F) -> Self {
        Self {
            name: name.into(),
            locks: LockSet::new(),
            store,
            work,
        }
    }

    pub fn with_locks(mut self, locks: LockSet) -> Self {
        self.locks = locks;
        self
    }
}

impl<St, F> Schedulable for TransactionalMetaTask<St, F>
where
    St: Store,
    F: Send + Sync + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn lock_objects(&self) -> LockSet {
        self.locks.clone()
    }
}

impl<St, F> MetaTask for TransactionalMetaTask<St, F>
where
    St: Store,
    F: Fn(&mut Transaction<'_, St::Session>, &TaskContext) -> Result<TaskGraph, TaskError>
        + Send
        + Sync
        + 'static,
{
    fn execute(&self, ctx: &TaskContext) -> Result<TaskGraph, TaskError> {
        ctx.check_aborted()?;
        run_transactional(&*self.store, ctx.broadcaster(), |tx| (self.work)(tx, ctx))
    }
}
