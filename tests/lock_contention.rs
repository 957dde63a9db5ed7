// tests/lock_contention.rs

use jobgraph::dag::TaskGraph;
use jobgraph::engine::{EngineConfig, JobEngine};
use jobgraph::lock::kinds;
use jobgraph::types::{JobState, TaskState};
use jobgraph_test_utils::tasks::{Recorder, RecordingTask};
use jobgraph_test_utils::{init_tracing, with_timeout};

fn engine(task_pool_size: usize) -> JobEngine {
    JobEngine::new(EngineConfig {
        task_pool_size,
        job_pool_size: 4,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tasks_sharing_a_lock_never_overlap() {
    init_tracing();
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    g.add_task(RecordingTask::new("first", &rec).lock(kinds::DISTRIBUTED_APPLIANCE, 1).sleep_ms(100));
    g.add_task(RecordingTask::new("second", &rec).lock(kinds::DISTRIBUTED_APPLIANCE, 1).sleep_ms(100));

    let engine = engine(4);
    let summary = with_timeout(engine.submit("same-lock", g).unwrap().wait()).await;

    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(rec.runs("first"), 1);
    assert_eq!(rec.runs("second"), 1);
    assert!(!rec.overlapped("first", "second"));
    assert_eq!(engine.locks().held_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn locks_are_exclusive_across_jobs() {
    init_tracing();
    let rec = Recorder::new();

    let mut one = TaskGraph::new();
    one.add_task(RecordingTask::new("job1", &rec).lock(kinds::VIRTUAL_SYSTEM, 9).sleep_ms(100));
    let mut two = TaskGraph::new();
    two.add_task(RecordingTask::new("job2", &rec).lock(kinds::VIRTUAL_SYSTEM, 9).sleep_ms(100));

    let engine = engine(4);
    let h1 = engine.submit("one", one).unwrap();
    let h2 = engine.submit("two", two).unwrap();

    let s1 = with_timeout(h1.wait()).await;
    let s2 = with_timeout(h2.wait()).await;

    assert_eq!(s1.state, JobState::Completed);
    assert_eq!(s2.state, JobState::Completed);
    assert!(!rec.overlapped("job1", "job2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disjoint_locks_run_in_parallel() {
    init_tracing();
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    g.add_task(RecordingTask::new("dai-1", &rec).lock(kinds::DISTRIBUTED_APPLIANCE_INSTANCE, 1).sleep_ms(200));
    g.add_task(RecordingTask::new("dai-2", &rec).lock(kinds::DISTRIBUTED_APPLIANCE_INSTANCE, 2).sleep_ms(200));

    let engine = engine(4);
    let summary = with_timeout(engine.submit("disjoint", g).unwrap().wait()).await;

    assert_eq!(summary.state, JobState::Completed);
    assert!(rec.overlapped("dai-1", "dai-2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_pool_bounds_concurrency() {
    init_tracing();
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    for i in 0..4 {
        g.add_task(RecordingTask::new(&format!("t{i}"), &rec).sleep_ms(40));
    }

    let engine = engine(2);
    let summary = with_timeout(engine.submit("bounded", g).unwrap().wait()).await;

    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(rec.intervals().len(), 4);
    assert!(rec.max_concurrency() <= 2, "{}", rec.max_concurrency());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lock_is_released_when_holder_fails() {
    init_tracing();
    let rec = Recorder::new();
    let mut g = TaskGraph::new();
    g.add_task(
        RecordingTask::new("breaks", &rec)
            .lock(kinds::SECURITY_GROUP, 3)
            .sleep_ms(30)
            .failing("agent unreachable"),
    );
    g.add_task(RecordingTask::new("waits", &rec).lock(kinds::SECURITY_GROUP, 3).sleep_ms(30));

    let engine = engine(4);
    let summary = with_timeout(engine.submit("release-on-failure", g).unwrap().wait()).await;

    assert_eq!(summary.state, JobState::Failed);
    assert_eq!(summary.task_state("breaks"), Some(TaskState::Failed));
    assert_eq!(summary.task_state("waits"), Some(TaskState::Passed));
    assert!(!rec.overlapped("breaks", "waits"));
    assert_eq!(engine.locks().held_count(), 0);
}
