// src/dag/scheduler.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::dag::TaskGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{GuardDecision, ReadOnlyStateManager, StateManager};
use crate::dag::task::{TaskContext, TaskId, TaskOutputs};
use crate::dag::task_info::{NodeRun, ScheduledTask, TaskCompletion, TaskReport};
use crate::engine::JobId;
use crate::errors::TaskError;
use crate::lock::{LockManager, LockOwner};
use crate::types::{JobState, TaskState};

/// Scheduler holds one job's task graph plus its mutable per-node state.
///
/// It is responsible for:
/// - deciding when a node is ready (all predecessors terminal, guard met)
/// - handing ready nodes out once their lock sets can be taken
/// - recording completions, splicing meta task expansions
/// - skipping descendants of failed nodes
/// - aborting
///
/// It does no IO: the job runtime feeds it completions and dispatches what it
/// hands out.
#[derive(Debug)]
pub struct Scheduler {
    job_id: JobId,
    graph: TaskGraph,
    runs: HashMap<TaskId, NodeRun>,
    /// Queued nodes in discovery order; contended ones stay here.
    ready: VecDeque<TaskId>,
    abort: CancellationToken,
    abort_reason: Option<String>,
    started: bool,
    broadcaster: Option<Broadcaster>,
}

impl Scheduler {
    pub fn new(job_id: JobId, graph: TaskGraph, abort: CancellationToken) -> Self {
        let runs = graph
            .task_ids()
            .into_iter()
            .map(|id| (id, NodeRun::pending()))
            .collect();

        Self {
            job_id,
            graph,
            runs,
            ready: VecDeque::new(),
            abort,
            abort_reason: None,
            started: false,
            broadcaster: None,
        }
    }

    /// Hand `broadcaster` to every task context this scheduler creates.
    pub fn with_broadcaster(mut self, broadcaster: Broadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Queue the nodes without predecessors.
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!(job_id = %self.job_id, "scheduler already started; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;

        debug!(job_id = %self.job_id, tasks = self.graph.len(), "scheduler: starting job");

        let mut step = self.promote();
        step.job_just_finished = self.is_finished();
        step
    }

    /// Whether any queued node is waiting for its locks or a dispatch.
    pub fn has_queued(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    /// Hand out every queued node whose lock set can be taken now.
    ///
    /// Nodes are tried in discovery order. A contended node stays queued and is
    /// retried on a later call; it does not block the nodes behind it.
    pub fn take_dispatchable(&mut self, locks: &LockManager) -> Vec<ScheduledTask> {
        let mut dispatched = Vec::new();
        let mut still_waiting = VecDeque::new();

        while let Some(id) = self.ready.pop_front() {
            let Some(node) = self.graph.node(id) else {
                warn!(job_id = %self.job_id, task_id = %id, "queued node missing from graph");
                continue;
            };

            let owner = LockOwner {
                job_id: self.job_id,
                task_id: id,
            };

            if let Err(contention) = locks.try_acquire(owner, &node.locks) {
                debug!(
                    job_id = %self.job_id,
                    task = %node.name,
                    lock = %contention.reference,
                    holder_job = %contention.holder.job_id,
                    holder_task = %contention.holder.task_id,
                    "lock contended; deferring task"
                );
                still_waiting.push_back(id);
                continue;
            }

            if let Some(run) = self.runs.get_mut(&id) {
                run.state = TaskState::Running;
                run.started_at = Some(Utc::now());
            }

            let mut context = TaskContext::new(
                self.job_id,
                id,
                node.name.clone(),
                self.abort.clone(),
                self.upstream_outputs(id),
            );
            if let Some(broadcaster) = &self.broadcaster {
                context = context.with_broadcaster(broadcaster.clone());
            }

            info!(job_id = %self.job_id, task_id = %id, task = %node.name, "dispatching task");

            dispatched.push(ScheduledTask {
                job_id: self.job_id,
                task_id: id,
                name: node.name.clone(),
                task: node.task.clone(),
                locks: node.locks.clone(),
                context: Arc::new(context),
            });
        }

        self.ready = still_waiting;
        dispatched
    }

    /// Record the completion of a running node and release its locks.
    pub fn complete(&mut self, completion: TaskCompletion, locks: &LockManager) -> SchedulerStep {
        let id = completion.task_id;
        let mut step = SchedulerStep::default();

        match self.runs.get(&id).map(|r| r.state) {
            Some(TaskState::Running) => {}
            Some(state) => {
                warn!(job_id = %self.job_id, task_id = %id, %state, "completion for a task that is not running; ignoring");
                return step;
            }
            None => {
                warn!(job_id = %self.job_id, task_id = %id, "completion for unknown task; ignoring");
                return step;
            }
        }

        if let Some(set) = self.graph.lock_objects(id) {
            locks.release(LockOwner { job_id: self.job_id, task_id: id }, set);
        }

        let name = self.graph.name_of(id).unwrap_or_default().to_string();
        step.changed.push(id);

        match completion.result {
            Ok(expansion) => {
                if let Some(run) = self.runs.get_mut(&id) {
                    run.outputs = Arc::new(completion.outputs);
                    run.finish(TaskState::Passed, None);
                }
                info!(job_id = %self.job_id, task_id = %id, task = %name, "task passed");

                match expansion {
                    Some(sub) if !sub.is_empty() && self.is_aborted() => {
                        debug!(
                            job_id = %self.job_id,
                            task = %name,
                            discarded = sub.len(),
                            "job aborted; discarding meta task expansion"
                        );
                    }
                    Some(sub) if !sub.is_empty() => self.splice(id, &name, sub, &mut step),
                    _ => {}
                }
            }
            Err(err) => {
                let state = if self.is_aborted() || matches!(err, TaskError::Aborted) {
                    TaskState::Aborted
                } else {
                    TaskState::Failed
                };
                let message = err.to_string();

                warn!(
                    job_id = %self.job_id,
                    task_id = %id,
                    task = %name,
                    %state,
                    error = %message,
                    "task did not pass; skipping its descendants"
                );

                if let Some(run) = self.runs.get_mut(&id) {
                    run.finish(state, Some(message));
                }
                self.skip_descendants(id, &mut step);
            }
        }

        let promoted = self.promote();
        step.merge(promoted);
        step.job_just_finished = self.is_finished();
        step
    }

    /// Splice a meta task's expansion after it.
    ///
    /// A rejected expansion (duplicate task, cycle) turns the meta task into a
    /// failure.
    fn splice(&mut self, meta: TaskId, name: &str, sub: TaskGraph, step: &mut SchedulerStep) {
        let size = sub.len();
        match self.graph.insert_graph_after(sub, meta) {
            Ok(inserted) => {
                for id in &inserted {
                    self.runs.insert(*id, NodeRun::pending());
                }
                info!(
                    job_id = %self.job_id,
                    task = %name,
                    inserted = size,
                    "spliced meta task expansion into job graph"
                );
                step.inserted.extend(inserted.iter().copied());
                step.changed.extend(inserted);
            }
            Err(err) => {
                let message = format!("expansion rejected: {err}");
                warn!(job_id = %self.job_id, task = %name, error = %message, "meta task expansion rejected");
                if let Some(run) = self.runs.get_mut(&meta) {
                    run.outputs = Arc::new(TaskOutputs::new());
                    run.finish(TaskState::Failed, Some(message));
                }
                self.skip_descendants(meta, step);
            }
        }
    }

    /// Abort the job: every pending or queued node becomes `Aborted` and the
    /// cancellation token is fired so running bodies can stop.
    ///
    /// Running nodes keep running; they end `Aborted` if they return an error
    /// from now on.
    pub fn abort(&mut self, reason: &str) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.is_aborted() {
            return step;
        }

        info!(job_id = %self.job_id, reason, "aborting job");
        self.abort_reason = Some(reason.to_string());
        self.abort.cancel();
        self.ready.clear();

        let mut manager = StateManager::new(&self.graph, &mut self.runs);
        step.changed = manager.abort_unstarted(reason);
        step.job_just_finished = self.is_finished();
        step
    }

    fn skip_descendants(&mut self, failed: TaskId, step: &mut SchedulerStep) {
        let mut manager = StateManager::new(&self.graph, &mut self.runs);
        let skipped = manager.mark_descendants_skipped(failed);
        step.changed.extend(skipped.iter().copied());
        step.newly_skipped.extend(skipped);
    }

    fn promote(&mut self) -> SchedulerStep {
        if self.is_aborted() {
            return SchedulerStep::default();
        }
        let mut manager = StateManager::new(&self.graph, &mut self.runs);
        manager.promote_ready(&mut self.ready)
    }

    /// Outputs of passed ancestors, nearest first.
    fn upstream_outputs(&self, id: TaskId) -> Vec<(TaskId, Arc<TaskOutputs>)> {
        self.graph
            .ancestors(id)
            .into_iter()
            .filter_map(|a| {
                let run = self.runs.get(&a)?;
                (run.state == TaskState::Passed && !run.outputs.is_empty())
                    .then(|| (a, Arc::clone(&run.outputs)))
            })
            .collect()
    }

    /// Whether no node is pending, queued or running.
    pub fn is_finished(&self) -> bool {
        self.runs.values().all(|r| r.state.is_terminal())
    }

    /// Current job state as seen by the scheduler.
    pub fn job_state(&self) -> JobState {
        if !self.is_finished() {
            return JobState::Running;
        }
        if self.is_aborted() {
            JobState::Aborted
        } else if self.runs.values().any(|r| r.state.is_failure()) {
            JobState::Failed
        } else {
            JobState::Completed
        }
    }

    /// Why the job did not complete, if it did not.
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(reason) = &self.abort_reason {
            return Some(format!("job aborted: {reason}"));
        }
        self.graph.task_ids().into_iter().find_map(|id| {
            let run = self.runs.get(&id)?;
            if !run.state.is_failure() {
                return None;
            }
            let name = self.graph.name_of(id).unwrap_or_default();
            Some(match &run.error {
                Some(err) => format!("task '{name}' {}: {err}", run.state.to_string().to_lowercase()),
                None => format!("task '{name}' {}", run.state.to_string().to_lowercase()),
            })
        })
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.runs.get(&id).map(|r| r.state)
    }

    /// Whether the guard of `id` is currently met.
    ///
    /// `None` while a predecessor is still running or the task is unknown.
    pub fn guard_met(&self, id: TaskId) -> Option<bool> {
        if !self.runs.contains_key(&id) {
            return None;
        }
        match ReadOnlyStateManager::new(&self.graph, &self.runs).decide(id) {
            GuardDecision::Wait => None,
            GuardDecision::Run => Some(true),
            GuardDecision::Skip => Some(false),
        }
    }

    pub fn report(&self, id: TaskId) -> Option<TaskReport> {
        let node = self.graph.node(id)?;
        let run = self.runs.get(&id)?;
        Some(TaskReport {
            id,
            name: node.name.clone(),
            state: run.state,
            guard: node.guard,
            error: run.error.clone(),
            producer: node.producer,
            queued_at: run.queued_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
        })
    }

    /// Reports for every node, in graph insertion order.
    pub fn reports(&self) -> Vec<TaskReport> {
        self.graph
            .task_ids()
            .into_iter()
            .filter_map(|id| self.report(id))
            .collect()
    }

    /// Ids of the nodes that are currently running.
    pub fn running(&self) -> HashSet<TaskId> {
        self.runs
            .iter()
            .filter(|(_, r)| r.state == TaskState::Running)
            .map(|(id, _)| *id)
            .collect()
    }
}
