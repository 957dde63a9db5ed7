// src/engine/queue.rs

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, warn};

use super::{JobEngine, JobRequest, JobSummary};
use crate::errors::{JobgraphError, Result};

struct QueuedJob {
    request: JobRequest,
    reply: oneshot::Sender<Result<JobSummary>>,
}

struct QueueState {
    pending: Mutex<VecDeque<QueuedJob>>,
    wake: Notify,
    closed: Mutex<bool>,
}

impl QueueState {
    fn pending(&self) -> MutexGuard<'_, VecDeque<QueuedJob>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serial FIFO in front of a [`JobEngine`].
///
/// Semantics:
/// - requests are submitted one at a time, in the order they were enqueued;
/// - the next request is only submitted once the previous job has reached a
///   terminal state, whatever that state is;
/// - a request the engine refuses (e.g. during shutdown) resolves its ticket
///   with the error and the queue moves on.
#[derive(Clone)]
pub struct JobQueue {
    state: Arc<QueueState>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("pending", &self.len())
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

/// Resolves with the summary of a queued job once it has run.
#[derive(Debug)]
pub struct QueueTicket {
    rx: oneshot::Receiver<Result<JobSummary>>,
}

impl QueueTicket {
    pub async fn wait(self) -> Result<JobSummary> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(JobgraphError::Other(anyhow::anyhow!(
                "job queue stopped before the job ran"
            ))),
        }
    }
}

impl JobQueue {
    /// Create a queue feeding `engine` and spawn its worker.
    pub fn new(engine: JobEngine) -> Self {
        let state = Arc::new(QueueState {
            pending: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closed: Mutex::new(false),
        });

        tokio::spawn(run_queue(engine, Arc::clone(&state)));

        Self { state }
    }

    /// Append a request to the queue.
    pub fn enqueue(&self, request: JobRequest) -> QueueTicket {
        let (reply, rx) = oneshot::channel();

        if self.state.is_closed() {
            let _ = reply.send(Err(JobgraphError::EngineShutdown(request.name)));
            return QueueTicket { rx };
        }

        debug!(job = %request.name, "job request queued");
        self.state.pending().push_back(QueuedJob { request, reply });
        self.state.wake.notify_one();

        QueueTicket { rx }
    }

    /// Number of requests not yet handed to the engine.
    pub fn len(&self) -> usize {
        self.state.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting requests; drop the ones not yet started.
    pub fn close(&self) {
        *self
            .state
            .closed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;

        let dropped: Vec<QueuedJob> = self.state.pending().drain(..).collect();
        if !dropped.is_empty() {
            warn!(dropped = dropped.len(), "job queue closed; dropping queued requests");
        }
        for job in dropped {
            let _ = job
                .reply
                .send(Err(JobgraphError::EngineShutdown(job.request.name)));
        }
        self.state.wake.notify_one();
    }
}

async fn run_queue(engine: JobEngine, state: Arc<QueueState>) {
    loop {
        let next = state.pending().pop_front();

        let Some(job) = next else {
            if state.is_closed() {
                break;
            }
            state.wake.notified().await;
            continue;
        };

        let name = job.request.name.clone();
        let result = match engine.submit_request(job.request) {
            Ok(handle) => {
                info!(job_id = %handle.id(), job = %name, "queued job submitted");
                Ok(handle.wait().await)
            }
            Err(err) => {
                warn!(job = %name, error = %err, "queued job rejected");
                Err(err)
            }
        };

        let _ = job.reply.send(result);
    }
    debug!("job queue worker stopped");
}
