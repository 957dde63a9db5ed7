// tests/job_queue.rs

use std::time::Duration;

use jobgraph::dag::TaskGraph;
use jobgraph::engine::{EngineConfig, JobEngine, JobQueue, JobRequest};
use jobgraph::errors::JobgraphError;
use jobgraph::types::JobState;
use jobgraph_test_utils::tasks::{Recorder, RecordingTask};
use jobgraph_test_utils::{init_tracing, with_timeout};

fn single(name: &str, rec: &Recorder, sleep_ms: u64) -> TaskGraph {
    let mut g = TaskGraph::new();
    g.add_task(RecordingTask::new(name, rec).sleep_ms(sleep_ms));
    g
}

fn engine() -> JobEngine {
    JobEngine::new(EngineConfig {
        task_pool_size: 4,
        job_pool_size: 4,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_jobs_run_one_at_a_time_in_order() {
    init_tracing();
    let rec = Recorder::new();
    let queue = JobQueue::new(engine());

    let tickets: Vec<_> = (1..=3)
        .map(|i| {
            let name = format!("job{i}");
            queue.enqueue(JobRequest::new(name.clone(), single(&name, &rec, 30)))
        })
        .collect();

    for ticket in tickets {
        let summary = with_timeout(ticket.wait()).await.unwrap();
        assert_eq!(summary.state, JobState::Completed);
    }

    assert_eq!(rec.started(), vec!["job1", "job2", "job3"]);
    assert_eq!(rec.max_concurrency(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn failed_job_does_not_block_the_queue() {
    init_tracing();
    let rec = Recorder::new();
    let queue = JobQueue::new(engine());

    let mut bad = TaskGraph::new();
    bad.add_task(RecordingTask::new("bad", &rec).failing("nope"));

    let t1 = queue.enqueue(JobRequest::new("bad", bad));
    let t2 = queue.enqueue(JobRequest::new("good", single("good", &rec, 0)));

    let s1 = with_timeout(t1.wait()).await.unwrap();
    let s2 = with_timeout(t2.wait()).await.unwrap();

    assert_eq!(s1.state, JobState::Failed);
    assert_eq!(s2.state, JobState::Completed);
    assert_eq!(rec.started(), vec!["bad", "good"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_queue_drops_waiting_requests() {
    init_tracing();
    let rec = Recorder::new();
    let engine = engine();
    let queue = JobQueue::new(engine.clone());

    let running = queue.enqueue(JobRequest::new("long", single("long", &rec, 60_000)));
    let waiting = queue.enqueue(JobRequest::new("waiting", single("waiting", &rec, 0)));

    with_timeout(async {
        while engine.active_jobs().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    queue.close();
    let err = with_timeout(waiting.wait()).await.unwrap_err();
    assert!(matches!(err, JobgraphError::EngineShutdown(name) if name == "waiting"));

    for job in engine.active_jobs() {
        job.abort("test over");
    }
    let summary = with_timeout(running.wait()).await.unwrap();
    assert_eq!(summary.state, JobState::Aborted);
    assert_eq!(rec.runs("waiting"), 0);

    let late = queue.enqueue(JobRequest::new("late", TaskGraph::new()));
    assert!(matches!(
        with_timeout(late.wait()).await,
        Err(JobgraphError::EngineShutdown(_))
    ));
}
