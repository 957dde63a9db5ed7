// tests/transactional_tasks.rs

use std::sync::{Arc, Mutex};

use jobgraph::broadcast::{BroadcastMessage, EventType};
use jobgraph::dag::{TaskContext, TaskGraph};
use jobgraph::engine::{EngineConfig, JobEngine};
use jobgraph::errors::TaskError;
use jobgraph::transaction::{
    InMemorySession, InMemoryStore, Transaction, TransactionalMetaTask, TransactionalTask,
    run_transactional,
};
use jobgraph::types::{JobState, TaskState};
use jobgraph_test_utils::tasks::{Recorder, RecordingTask};
use jobgraph_test_utils::{init_tracing, with_timeout};

const APPLIANCE: &str = "DistributedAppliance";

fn engine() -> JobEngine {
    JobEngine::new(EngineConfig {
        task_pool_size: 2,
        job_pool_size: 1,
    })
}

fn listen(engine: &JobEngine) -> Arc<Mutex<Vec<BroadcastMessage>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine
        .broadcaster()
        .register(move |msg: &BroadcastMessage| sink.lock().unwrap().push(msg.clone()));
    seen
}

#[tokio::test]
async fn committed_work_is_visible_and_broadcast() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let engine = engine();
    let seen = listen(&engine);

    let task = TransactionalTask::new(
        "create appliance",
        Arc::clone(&store),
        |tx: &mut Transaction<'_, InMemorySession>, _ctx: &TaskContext| {
            let id = tx.persist(APPLIANCE, "asa-1")?;
            tx.notify(id, APPLIANCE, EventType::Added);
            assert_eq!(tx.pending_broadcasts().len(), 1);
            Ok(())
        },
    );

    let mut g = TaskGraph::new();
    g.add_task(task);
    let summary = with_timeout(engine.submit("create", g).unwrap().wait()).await;
    engine.broadcaster().flush().await;

    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(store.count(APPLIANCE), 1);
    assert_eq!(store.commits(), 1);
    assert_eq!(store.rollbacks(), 0);
    assert_eq!(store.open_sessions(), 0);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].receiver, APPLIANCE);
    assert_eq!(seen[0].event, EventType::Added);
    assert_eq!(store.get(APPLIANCE, seen[0].entity_id).as_deref(), Some("asa-1"));
}

#[tokio::test]
async fn failed_work_is_rolled_back_silently() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let engine = engine();
    let seen = listen(&engine);

    let task = TransactionalTask::new(
        "half-done",
        Arc::clone(&store),
        |tx: &mut Transaction<'_, InMemorySession>, _ctx: &TaskContext| {
            let id = tx.persist(APPLIANCE, "asa-2")?;
            tx.notify(id, APPLIANCE, EventType::Added);
            Err(TaskError::execution("vendor rejected the appliance"))
        },
    );

    let mut g = TaskGraph::new();
    g.add_task(task);
    let summary = with_timeout(engine.submit("rollback", g).unwrap().wait()).await;
    engine.broadcaster().flush().await;

    assert_eq!(summary.state, JobState::Failed);
    let report = summary.report("half-done").unwrap();
    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.error.as_deref(), Some("vendor rejected the appliance"));

    assert_eq!(store.count(APPLIANCE), 0);
    assert_eq!(store.commits(), 0);
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(store.open_sessions(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn commit_failure_fails_the_task() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    store.fail_next_commit();
    let engine = engine();
    let seen = listen(&engine);

    let task = TransactionalTask::new(
        "unlucky",
        Arc::clone(&store),
        |tx: &mut Transaction<'_, InMemorySession>, _ctx: &TaskContext| {
            let id = tx.persist(APPLIANCE, "asa-3")?;
            tx.notify(id, APPLIANCE, EventType::Added);
            Ok(())
        },
    );

    let mut g = TaskGraph::new();
    g.add_task(task);
    let summary = with_timeout(engine.submit("commit-fails", g).unwrap().wait()).await;
    engine.broadcaster().flush().await;

    assert_eq!(summary.state, JobState::Failed);
    let error = summary.report("unlucky").unwrap().error.clone().unwrap();
    assert_eq!(error, "transaction failed: commit: commit rejected by store");
    assert_eq!(store.count(APPLIANCE), 0);
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(store.open_sessions(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transactional_meta_task_expands_after_commit() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let rec = Recorder::new();
    let engine = engine();

    let inner = rec.clone();
    let meta = TransactionalMetaTask::new(
        "plan sync",
        Arc::clone(&store),
        move |tx: &mut Transaction<'_, InMemorySession>, _ctx: &TaskContext| {
            tx.persist("SyncPlan", "plan-1")?;
            let mut sub = TaskGraph::new();
            sub.add_task(RecordingTask::new("apply plan", &inner));
            Ok(sub)
        },
    );

    let mut g = TaskGraph::new();
    g.add_meta_task(meta);
    let summary = with_timeout(engine.submit("meta-tx", g).unwrap().wait()).await;

    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(store.count("SyncPlan"), 1);
    assert_eq!(rec.started(), vec!["apply plan"]);
}

#[tokio::test]
async fn transactional_meta_task_commit_failure_discards_expansion() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    store.fail_next_commit();
    let rec = Recorder::new();
    let engine = engine();

    let inner = rec.clone();
    let meta = TransactionalMetaTask::new(
        "plan sync",
        Arc::clone(&store),
        move |tx: &mut Transaction<'_, InMemorySession>, _ctx: &TaskContext| {
            tx.persist("SyncPlan", "plan-1")?;
            let mut sub = TaskGraph::new();
            sub.add_task(RecordingTask::new("apply plan", &inner));
            Ok(sub)
        },
    );

    let mut g = TaskGraph::new();
    g.add_meta_task(meta);
    let summary = with_timeout(engine.submit("meta-tx-fails", g).unwrap().wait()).await;

    assert_eq!(summary.state, JobState::Failed);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(rec.runs("apply plan"), 0);
    assert_eq!(store.count("SyncPlan"), 0);
}

#[test]
fn run_transactional_without_broadcaster() {
    let store = InMemoryStore::new();

    let id = run_transactional(&store, None, |tx| {
        let id = tx.persist(APPLIANCE, "asa-4")?;
        tx.notify(id, APPLIANCE, EventType::Updated);
        Ok(id)
    })
    .unwrap();

    assert_eq!(store.get(APPLIANCE, id).as_deref(), Some("asa-4"));
    assert_eq!(store.commits(), 1);
    assert_eq!(store.open_sessions(), 0);
}

#[test]
fn failed_statement_rolls_back_earlier_writes() {
    let store = InMemoryStore::new();

    let id = run_transactional(&store, None, |tx| Ok(tx.persist(APPLIANCE, "a")?)).unwrap();
    let err = run_transactional(&store, None, |tx| {
        tx.update(APPLIANCE, id, "b")?;
        tx.delete(APPLIANCE, id + 1000)?;
        Ok(())
    })
    .unwrap_err();

    assert!(err.to_string().contains("does not exist"), "{err}");
    assert_eq!(store.get(APPLIANCE, id).as_deref(), Some("a"));
    assert_eq!(store.rollbacks(), 1);
}

#[test]
fn panicking_body_is_rolled_back() {
    init_tracing();
    let store = InMemoryStore::new();

    let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = run_transactional(&store, None, |tx| -> Result<(), TaskError> {
            tx.persist(APPLIANCE, "half-written")?;
            panic!("agent client bug");
        });
    }));

    assert!(unwound.is_err());
    assert_eq!(store.count(APPLIANCE), 0);
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(store.commits(), 0);
    assert_eq!(store.open_sessions(), 0);
}
