// src/broadcast.rs

//! Post-commit change notification fan-out.
//!
//! A [`Broadcaster`] is an explicit context object: whoever needs to notify
//! listeners is handed a clone of it. Messages are delivered by a single
//! dispatch task, in the order they were broadcast, so listeners never see
//! two messages concurrently and registration can happen at any time.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::errors::panic_message;

/// Kind of change an entity went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Updated,
    Deleted,
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub entity_id: i64,
    /// Entity kind the change is about; listeners filter on it.
    pub receiver: String,
    pub event: EventType,
}

impl BroadcastMessage {
    pub fn new(entity_id: i64, receiver: impl Into<String>, event: EventType) -> Self {
        Self {
            entity_id,
            receiver: receiver.into(),
            event,
        }
    }
}

/// Something that wants to hear about committed changes.
pub trait BroadcastListener: Send + Sync + 'static {
    fn receive(&self, message: &BroadcastMessage);
}

impl<F> BroadcastListener for F
where
    F: Fn(&BroadcastMessage) + Send + Sync + 'static,
{
    fn receive(&self, message: &BroadcastMessage) {
        self(message)
    }
}

/// Token returned by [`Broadcaster::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Dispatch {
    Message(BroadcastMessage),
    Flush(oneshot::Sender<()>),
}

type Listeners = Vec<(ListenerId, Arc<dyn BroadcastListener>)>;

struct Inner {
    listeners: Mutex<Listeners>,
    tx: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    next_id: AtomicU64,
}

/// Cloneable handle to one fan-out context.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("listeners", &self.listener_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Broadcaster {
    /// Create a broadcaster and spawn its dispatch task.
    ///
    /// The task stops after [`Broadcaster::close`] or once every handle is
    /// dropped. Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            listeners: Mutex::new(Vec::new()),
            tx: Mutex::new(Some(tx)),
            next_id: AtomicU64::new(1),
        });

        tokio::spawn(dispatch_loop(Arc::downgrade(&inner), rx));

        Self { inner }
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        lock(&self.inner.listeners)
    }

    pub fn register(&self, listener: impl BroadcastListener) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, Arc::new(listener)));
        debug!(listener = id.0, "broadcast listener registered");
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        let removed = listeners.len() != before;
        debug!(listener = id.0, removed, "broadcast listener unregistered");
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Queue `message` for delivery. Never blocks.
    ///
    /// Messages sent after [`Broadcaster::close`] are dropped.
    pub fn broadcast(&self, message: BroadcastMessage) {
        let tx = lock(&self.inner.tx);
        match tx.as_ref() {
            Some(tx) => {
                trace!(
                    entity_id = message.entity_id,
                    receiver = %message.receiver,
                    event = ?message.event,
                    "queueing broadcast"
                );
                if tx.send(Dispatch::Message(message)).is_err() {
                    warn!("broadcast dispatcher has stopped; dropping message");
                }
            }
            None => {
                debug!(receiver = %message.receiver, "broadcaster closed; dropping message");
            }
        }
    }

    /// Wait until every message queued before this call has been delivered.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = {
            let tx = lock(&self.inner.tx);
            tx.as_ref()
                .map(|tx| tx.send(Dispatch::Flush(done_tx)).is_ok())
                .unwrap_or(false)
        };
        if sent {
            let _ = done_rx.await;
        }
    }

    /// Stop accepting messages. Already queued messages are still delivered.
    pub fn close(&self) {
        if lock(&self.inner.tx).take().is_some() {
            debug!("broadcaster closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.tx).is_none()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Holds only a weak reference: `Inner` owns the sender, so dropping the last
// handle closes the channel and ends the loop.
async fn dispatch_loop(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(item) = rx.recv().await {
        match item {
            Dispatch::Message(message) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                // Snapshot so listeners may (un)register from inside `receive`.
                let listeners: Vec<(ListenerId, Arc<dyn BroadcastListener>)> =
                    lock(&inner.listeners).clone();
                drop(inner);

                debug!(
                    entity_id = message.entity_id,
                    receiver = %message.receiver,
                    event = ?message.event,
                    listeners = listeners.len(),
                    "dispatching broadcast"
                );

                for (id, listener) in listeners {
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(|| listener.receive(&message)));
                    if let Err(payload) = delivered {
                        error!(
                            listener = id.0,
                            entity_id = message.entity_id,
                            receiver = %message.receiver,
                            panic = %panic_message(payload.as_ref()),
                            "broadcast listener panicked"
                        );
                    }
                }
            }
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("broadcast dispatcher stopped");
}
