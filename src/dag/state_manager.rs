// src/dag/state_manager.rs

//! Per-job state transitions: guard evaluation, skip propagation, readiness.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use tracing::{debug, warn};

use crate::dag::TaskGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::task::TaskId;
use crate::dag::task_info::NodeRun;
use crate::types::{TaskGuard, TaskState};

/// Outcome of evaluating a node's guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardDecision {
    /// Some predecessor is not terminal yet.
    Wait,
    Run,
    Skip,
}

/// Borrows the graph and the per-node states of one job and applies
/// transitions to them.
pub(crate) struct StateManager<'a> {
    graph: &'a TaskGraph,
    runs: &'a mut HashMap<TaskId, NodeRun>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a TaskGraph, runs: &'a mut HashMap<TaskId, NodeRun>) -> Self {
        Self { graph, runs }
    }

    fn state(&self, id: TaskId) -> Option<TaskState> {
        self.runs.get(&id).map(|r| r.state)
    }

    /// Evaluate the guard of `id` against the current states.
    pub fn decide(&self, id: TaskId) -> GuardDecision {
        ReadOnlyStateManager::new(self.graph, &*self.runs).decide(id)
    }

    /// Mark every pending descendant of `failed` as `Skipped`.
    ///
    /// Propagation stops at nodes guarded by `AllPredecessorsCompleted`: those
    /// still run once their predecessors are terminal.
    pub fn mark_descendants_skipped(&mut self, failed: TaskId) -> Vec<TaskId> {
        let mut queue: VecDeque<TaskId> = self.graph.successors(failed).into();
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut skipped = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }

            if self.graph.guard(id) == Some(TaskGuard::AllPredecessorsCompleted) {
                continue;
            }

            let Some(run) = self.runs.get_mut(&id) else {
                warn!(task_id = %id, "node in graph without run state");
                continue;
            };

            if run.state != TaskState::Pending {
                continue;
            }

            run.finish(TaskState::Skipped, None);
            debug!(
                task_id = %id,
                task = self.graph.name_of(id).unwrap_or_default(),
                upstream = %failed,
                "marking descendant Skipped due to upstream failure"
            );
            skipped.push(id);
            queue.extend(self.graph.successors(id));
        }

        skipped
    }

    /// Move every pending node whose predecessors are all terminal to
    /// `Queued` (guard met, appended to `ready`) or `Skipped` (guard not met).
    ///
    /// Runs to a fixpoint since a skip can settle further nodes. Nodes are
    /// visited in graph insertion order, which makes the ready queue order
    /// deterministic.
    pub fn promote_ready(&mut self, ready: &mut VecDeque<TaskId>) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        loop {
            let mut progressed = false;

            for id in self.graph.task_ids() {
                if self.state(id) != Some(TaskState::Pending) {
                    continue;
                }

                match self.decide(id) {
                    GuardDecision::Wait => {}
                    GuardDecision::Run => {
                        if let Some(run) = self.runs.get_mut(&id) {
                            run.state = TaskState::Queued;
                            run.queued_at = Some(Utc::now());
                        }
                        debug!(
                            task_id = %id,
                            task = self.graph.name_of(id).unwrap_or_default(),
                            "predecessors settled; marking Queued"
                        );
                        ready.push_back(id);
                        step.newly_queued.push(id);
                        step.changed.push(id);
                        progressed = true;
                    }
                    GuardDecision::Skip => {
                        if let Some(run) = self.runs.get_mut(&id) {
                            run.finish(TaskState::Skipped, None);
                        }
                        debug!(
                            task_id = %id,
                            task = self.graph.name_of(id).unwrap_or_default(),
                            guard = ?self.graph.guard(id),
                            "guard not met; marking Skipped"
                        );
                        step.newly_skipped.push(id);
                        step.changed.push(id);
                        progressed = true;
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        step
    }

    /// Mark every pending or queued node `Aborted`.
    pub fn abort_unstarted(&mut self, reason: &str) -> Vec<TaskId> {
        let mut aborted = Vec::new();
        for id in self.graph.task_ids() {
            if let Some(run) = self.runs.get_mut(&id) {
                if matches!(run.state, TaskState::Pending | TaskState::Queued) {
                    run.finish(TaskState::Aborted, Some(reason.to_string()));
                    aborted.push(id);
                }
            }
        }
        aborted
    }
}

/// Shared-access view used where only `&` to the run states is available
/// (e.g. `Scheduler::guard_met`).
pub(crate) struct ReadOnlyStateManager<'a> {
    graph: &'a TaskGraph,
    runs: &'a HashMap<TaskId, NodeRun>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a TaskGraph, runs: &'a HashMap<TaskId, NodeRun>) -> Self {
        Self { graph, runs }
    }

    fn state(&self, id: TaskId) -> Option<TaskState> {
        self.runs.get(&id).map(|r| r.state)
    }

    /// Guard check. `Wait` while any direct predecessor is not terminal.
    pub fn decide(&self, id: TaskId) -> GuardDecision {
        let pred_states: Vec<TaskState> = self
            .graph
            .predecessors(id)
            .iter()
            .map(|p| self.state(*p).unwrap_or(TaskState::Pending))
            .collect();

        if pred_states.iter().any(|s| !s.is_terminal()) {
            return GuardDecision::Wait;
        }

        let met = match self.graph.guard(id).unwrap_or_default() {
            TaskGuard::AllPredecessorsSucceeded => {
                pred_states.iter().all(|s| *s == TaskState::Passed)
            }
            TaskGuard::AllPredecessorsCompleted => true,
            TaskGuard::AllAncestorsSucceeded => self
                .graph
                .ancestors(id)
                .iter()
                .all(|a| self.state(*a) == Some(TaskState::Passed)),
        };

        if met {
            GuardDecision::Run
        } else {
            GuardDecision::Skip
        }
    }
}
