// tests/graph_construction.rs

use jobgraph::dag::{TaskGraph, TaskRef};
use jobgraph::errors::GraphError;
use jobgraph::types::TaskGuard;
use jobgraph_test_utils::tasks::{Recorder, RecordingTask};

fn task(name: &str, rec: &Recorder) -> RecordingTask {
    RecordingTask::new(name, rec)
}

#[test]
fn add_dependency_rejects_cycles_and_self_edges() {
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    let a = g.add_task(task("A", &rec));
    let b = g.add_task(task("B", &rec));
    let c = g.add_task(task("C", &rec));

    g.add_dependency(a, b).unwrap();
    g.add_dependency(b, c).unwrap();

    assert_eq!(
        g.add_dependency(c, a),
        Err(GraphError::Cycle { before: c, after: a })
    );
    assert_eq!(
        g.add_dependency(b, b),
        Err(GraphError::Cycle { before: b, after: b })
    );

    // Re-adding an existing edge is a no-op.
    g.add_dependency(a, b).unwrap();
    assert_eq!(g.successors(a), vec![b]);
}

#[test]
fn same_task_object_cannot_be_added_twice() {
    let rec = Recorder::new();
    let shared = TaskRef::task(task("A", &rec));

    let mut g = TaskGraph::new();
    let first = g.add(shared.clone()).unwrap();

    match g.add(shared) {
        Err(GraphError::DuplicateTask { name, existing }) => {
            assert_eq!(name, "A");
            assert_eq!(existing, first);
        }
        other => panic!("expected DuplicateTask, got {other:?}"),
    }

    // Equal name, different object: fine.
    g.add_task(task("A", &rec));
    assert_eq!(g.len(), 2);
}

#[test]
fn append_task_runs_after_every_sink() {
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    let a = g.add_task(task("A", &rec));
    let b = g.add_task(task("B", &rec));

    let c = g.append_task(TaskRef::task(task("C", &rec))).unwrap();

    let mut preds = g.predecessors(c);
    preds.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(preds, expected);
    assert_eq!(g.sinks(), vec![c]);
}

#[test]
fn append_graph_links_sinks_to_sources() {
    let rec = Recorder::new();
    let mut first = TaskGraph::new();
    let a = first.add_task(task("A", &rec));
    let b = first.add_task(task("B", &rec));
    first.add_dependency(a, b).unwrap();

    let mut second = TaskGraph::new();
    let x = second.add_task(task("X", &rec));
    let y = second.add_task(task("Y", &rec));

    first.append_graph(second).unwrap();

    assert_eq!(first.len(), 4);
    assert_eq!(first.predecessors(x), vec![b]);
    assert_eq!(first.predecessors(y), vec![b]);
    assert!(first.descendants(a).contains(&x));
}

#[test]
fn merge_graph_adds_no_edges() {
    let rec = Recorder::new();
    let mut first = TaskGraph::new();
    let a = first.add_task(task("A", &rec));

    let mut second = TaskGraph::new();
    let x = second.add_task(task("X", &rec));

    first.merge_graph(second).unwrap();

    assert!(first.successors(a).is_empty());
    assert!(first.predecessors(x).is_empty());
    assert_eq!(first.sources().len(), 2);
}

#[test]
fn insert_graph_after_splices_between_node_and_its_successors() {
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    let m = g.add_task(task("M", &rec));
    let s = g.add_task(task("S", &rec));
    g.add_dependency(m, s).unwrap();

    let mut sub = TaskGraph::new();
    let x = sub.add_task(task("X", &rec));
    let y = sub.add_task(task("Y", &rec));
    sub.add_dependency(x, y).unwrap();

    let inserted = g.insert_graph_after(sub, m).unwrap();

    assert_eq!(inserted.len(), 2);
    assert!(inserted.contains(&x) && inserted.contains(&y));
    assert_eq!(g.predecessors(x), vec![m]);
    assert!(g.predecessors(s).contains(&y));
    // The original edge stays.
    assert!(g.predecessors(s).contains(&m));
    assert_eq!(g.producer(x), Some(m));
    assert_eq!(g.producer(y), Some(m));
    assert_eq!(g.producer(m), None);

    let order = g.topological_order();
    let pos = |id| order.iter().position(|o| *o == id).unwrap();
    assert!(pos(m) < pos(x));
    assert!(pos(x) < pos(y));
    assert!(pos(y) < pos(s));
}

#[test]
fn rejected_merge_leaves_graph_untouched() {
    let rec = Recorder::new();
    let shared = TaskRef::task(task("A", &rec));

    let mut g = TaskGraph::new();
    g.add(shared.clone()).unwrap();

    let mut other = TaskGraph::new();
    other.add_task(task("B", &rec));
    other.add(shared).unwrap();

    let err = g.merge_graph(other).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateTask { .. }));
    assert_eq!(g.len(), 1);
    assert!(g.find_by_name("B").is_none());
}

#[test]
fn add_task_after_sets_guard_and_edges() {
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    let a = g.add_task(task("A", &rec));
    let b = g.add_task(task("B", &rec));

    let c = g
        .add_task_after(
            TaskRef::task(task("C", &rec)),
            TaskGuard::AllPredecessorsCompleted,
            &[a, b],
        )
        .unwrap();

    assert_eq!(g.guard(c), Some(TaskGuard::AllPredecessorsCompleted));
    assert_eq!(g.guard(a), Some(TaskGuard::AllPredecessorsSucceeded));
    assert_eq!(g.predecessors(c).len(), 2);
    assert_eq!(g.find_by_name("C"), Some(c));

    g.set_guard(a, TaskGuard::AllAncestorsSucceeded).unwrap();
    assert_eq!(g.guard(a), Some(TaskGuard::AllAncestorsSucceeded));
}

#[test]
fn ancestors_and_descendants_are_transitive() {
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    let a = g.add_task(task("A", &rec));
    let b = g.add_task(task("B", &rec));
    let c = g.add_task(task("C", &rec));
    let d = g.add_task(task("D", &rec));
    g.add_dependency(a, b).unwrap();
    g.add_dependency(b, c).unwrap();

    assert_eq!(g.ancestors(c), vec![b, a]);
    assert_eq!(g.descendants(a), vec![b, c]);
    assert!(g.ancestors(d).is_empty());
    assert!(g.descendants(d).is_empty());
}

#[test]
fn lock_objects_are_captured_at_insertion() {
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    let a = g.add_task(task("A", &rec).lock("DistributedAppliance", 7));

    let locks = g.lock_objects(a).unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(
        locks.iter().next().unwrap().to_string(),
        "DistributedAppliance:7"
    );
}
