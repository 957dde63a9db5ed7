use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use jobgraph::dag::{ScheduledTask, TaskCompletion};
use jobgraph::errors::Result;
use jobgraph::exec::{TaskExecutor, run_task};

/// A fake executor that:
/// - records the names of dispatched tasks, in dispatch order
/// - runs each body inline on the runtime's task, one at a time.
///
/// Only suitable for bodies that return quickly.
#[derive(Debug, Clone, Default)]
pub struct InlineExecutor {
    dispatched: Arc<Mutex<Vec<String>>>,
}

impl InlineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl TaskExecutor for InlineExecutor {
    fn spawn_ready_tasks(
        &self,
        tasks: Vec<ScheduledTask>,
        completions: mpsc::UnboundedSender<TaskCompletion>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let dispatched = Arc::clone(&self.dispatched);

        Box::pin(async move {
            for task in tasks {
                dispatched.lock().unwrap().push(task.name.clone());
                let completion = run_task(&task);
                completions
                    .send(completion)
                    .map_err(|e| anyhow::anyhow!("completion channel closed: {e}"))?;
            }
            Ok(())
        })
    }
}

/// An executor that accepts tasks and never runs them.
///
/// Every dispatched task stays `Running` until the job is aborted and the
/// held completions are released with [`StallingExecutor::release`].
#[derive(Debug, Clone, Default)]
pub struct StallingExecutor {
    held: Arc<Mutex<Vec<(ScheduledTask, mpsc::UnboundedSender<TaskCompletion>)>>>,
}

impl StallingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> Vec<String> {
        self.held
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.name.clone())
            .collect()
    }

    /// Run every held task body now.
    pub fn release(&self) {
        let held: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        for (task, completions) in held {
            let _ = completions.send(run_task(&task));
        }
    }
}

impl TaskExecutor for StallingExecutor {
    fn spawn_ready_tasks(
        &self,
        tasks: Vec<ScheduledTask>,
        completions: mpsc::UnboundedSender<TaskCompletion>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let held = Arc::clone(&self.held);
        Box::pin(async move {
            let mut held = held.lock().unwrap();
            for task in tasks {
                held.push((task, completions.clone()));
            }
            Ok(())
        })
    }
}
