// tests/graph_properties.rs

use std::collections::HashSet;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use jobgraph::dag::{Scheduler, TaskCompletion, TaskGraph, TaskId};
use jobgraph::engine::JobId;
use jobgraph::errors::TaskError;
use jobgraph::lock::LockManager;
use jobgraph::types::{JobState, TaskState};
use jobgraph_test_utils::tasks::{Recorder, RecordingTask};

// Random DAG: task N may only depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let mut valid: Vec<usize> = if i == 0 {
                            Vec::new()
                        } else {
                            deps.into_iter().map(|d| d % i).collect()
                        };
                        valid.sort();
                        valid.dedup();
                        valid
                    })
                    .collect()
            },
        )
    })
}

fn build(deps: &[Vec<usize>]) -> (TaskGraph, Vec<TaskId>) {
    let rec = Recorder::new();
    let mut graph = TaskGraph::new();
    let ids: Vec<TaskId> = (0..deps.len())
        .map(|i| graph.add_task(RecordingTask::new(&format!("task_{i}"), &rec)))
        .collect();
    for (i, ds) in deps.iter().enumerate() {
        for d in ds {
            graph.add_dependency(ids[*d], ids[i]).unwrap();
        }
    }
    (graph, ids)
}

proptest! {
    #[test]
    fn topological_order_respects_every_edge(deps in dag_strategy(12)) {
        let (graph, ids) = build(&deps);
        let order = graph.topological_order();
        prop_assert_eq!(order.len(), ids.len());

        let pos = |id: TaskId| order.iter().position(|o| *o == id).unwrap();
        for (i, ds) in deps.iter().enumerate() {
            for d in ds {
                prop_assert!(pos(ids[*d]) < pos(ids[i]));
            }
        }
    }

    #[test]
    fn back_edges_are_always_rejected(deps in dag_strategy(12)) {
        let (mut graph, ids) = build(&deps);
        for (i, ds) in deps.iter().enumerate() {
            for d in ds {
                prop_assert!(graph.add_dependency(ids[i], ids[*d]).is_err());
            }
        }
        prop_assert_eq!(graph.topological_order().len(), ids.len());
    }

    #[test]
    fn scheduler_settles_every_task(
        deps in dag_strategy(10),
        failing in proptest::collection::hash_set(0..10usize, 0..4),
    ) {
        let (graph, ids) = build(&deps);
        let failing: HashSet<TaskId> = failing
            .into_iter()
            .filter(|i| *i < ids.len())
            .map(|i| ids[i])
            .collect();

        let locks = LockManager::new();
        let mut scheduler = Scheduler::new(JobId::detached(), graph, CancellationToken::new());
        scheduler.start();

        loop {
            let batch = scheduler.take_dispatchable(&locks);
            if batch.is_empty() {
                break;
            }
            for task in batch {
                let completion = if failing.contains(&task.task_id) {
                    TaskCompletion::failed(task.task_id, TaskError::execution("boom"))
                } else {
                    TaskCompletion::passed(task.task_id)
                };
                scheduler.complete(completion, &locks);
            }
        }

        prop_assert!(scheduler.is_finished());
        prop_assert_eq!(locks.held_count(), 0);

        for (i, ds) in deps.iter().enumerate() {
            let id = ids[i];
            let state = scheduler.state_of(id).unwrap();
            let preds_passed = ds
                .iter()
                .all(|d| scheduler.state_of(ids[*d]) == Some(TaskState::Passed));

            if preds_passed {
                let expected = if failing.contains(&id) { TaskState::Failed } else { TaskState::Passed };
                prop_assert_eq!(state, expected);
            } else {
                prop_assert_eq!(state, TaskState::Skipped);
            }
        }

        let any_failed = ids.iter().any(|id| scheduler.state_of(*id) == Some(TaskState::Failed));
        let expected_job = if any_failed { JobState::Failed } else { JobState::Completed };
        prop_assert_eq!(scheduler.job_state(), expected_job);
    }
}
