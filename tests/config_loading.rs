// tests/config_loading.rs

use std::fs;

use jobgraph::config::{ConfigFile, load_and_validate, parse_str};
use jobgraph::engine::{DEFAULT_JOB_POOL_SIZE, DEFAULT_TASK_POOL_SIZE, JobEngine};
use jobgraph::errors::JobgraphError;
use jobgraph::lock::LockObjectReference;
use jobgraph::sim::graph_from_config;
use jobgraph::types::{JobState, TaskGuard, TaskState};
use jobgraph_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use jobgraph_test_utils::{init_tracing, with_timeout};

const SAMPLE: &str = r#"
[engine]
task_pool_size = 3
job_pool_size = 1

[job]
name = "sync appliance"

[task.lock_da]
locks = ["DistributedAppliance:7"]

[task.push_config]
after = ["lock_da"]
sleep_ms = 5
fail = true
fail_message = "manager refused config"

[task.unlock_da]
after = ["push_config"]
guard = "all_predecessors_completed"
"#;

fn validate(toml: &str) -> Result<ConfigFile, JobgraphError> {
    ConfigFile::try_from(parse_str(toml)?)
}

#[test]
fn loads_and_validates_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Jobgraph.toml");
    fs::write(&path, SAMPLE).unwrap();

    let cfg = load_and_validate(&path).unwrap();

    assert_eq!(cfg.engine.task_pool_size, 3);
    assert_eq!(cfg.engine.job_pool_size, 1);
    assert_eq!(cfg.job.name, "sync appliance");
    assert_eq!(cfg.task.len(), 3);

    let lock_da = &cfg.task["lock_da"];
    assert!(lock_da.locks.contains(&LockObjectReference::new("DistributedAppliance", 7)));
    assert_eq!(lock_da.guard, TaskGuard::AllPredecessorsSucceeded);

    let push = &cfg.task["push_config"];
    assert!(push.fail);
    assert_eq!(push.sleep_ms, 5);
    assert_eq!(cfg.task["unlock_da"].guard, TaskGuard::AllPredecessorsCompleted);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, JobgraphError::IoError(_)));
}

#[test]
fn sections_default_when_absent() {
    let cfg = validate("[task.only]\n").unwrap();
    assert_eq!(cfg.engine.task_pool_size, DEFAULT_TASK_POOL_SIZE);
    assert_eq!(cfg.engine.job_pool_size, DEFAULT_JOB_POOL_SIZE);
    assert_eq!(cfg.job.name, "jobgraph");
    assert_eq!(cfg.engine_config().task_pool_size, DEFAULT_TASK_POOL_SIZE);
}

#[test]
fn rejects_invalid_configs() {
    let cases: &[(&str, &str)] = &[
        ("", "at least one"),
        ("[engine]\ntask_pool_size = 0\n[task.a]\n", "task_pool_size"),
        ("[engine]\njob_pool_size = 0\n[task.a]\n", "job_pool_size"),
        ("[task.a]\nafter = [\"ghost\"]\n", "unknown dependency 'ghost'"),
        ("[task.a]\nafter = [\"a\"]\n", "depend on itself"),
        ("[task.a]\nlocks = [\"no-id\"]\n", "invalid lock 'no-id'"),
        ("[task.a]\nlocks = [\"Kind:abc\"]\n", "bad id"),
    ];

    for (toml, needle) in cases {
        let err = validate(toml).unwrap_err();
        assert!(
            matches!(err, JobgraphError::ConfigError(_)),
            "expected ConfigError for {toml:?}, got {err:?}"
        );
        assert!(err.to_string().contains(needle), "{err} should mention {needle}");
    }
}

#[test]
fn rejects_cycles() {
    let err = validate("[task.a]\nafter = [\"b\"]\n[task.b]\nafter = [\"a\"]\n").unwrap_err();
    assert!(matches!(err, JobgraphError::DagCycle(_)), "{err:?}");
}

#[test]
fn rejects_unknown_keys_and_guards() {
    let err = validate("[task.a]\ncmd = \"echo\"\n").unwrap_err();
    assert!(matches!(err, JobgraphError::TomlError(_)), "{err:?}");

    let err = validate("[task.a]\nguard = \"sometimes\"\n").unwrap_err();
    assert!(matches!(err, JobgraphError::TomlError(_)), "{err:?}");
}

#[test]
fn builder_configs_become_graphs() {
    let cfg = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new().build())
        .with_task("b", TaskConfigBuilder::new().after("a").build())
        .with_task(
            "c",
            TaskConfigBuilder::new()
                .after("a")
                .after("b")
                .guard(TaskGuard::AllAncestorsSucceeded)
                .lock("VirtualSystem:2")
                .build(),
        )
        .build();

    let graph = graph_from_config(&cfg).unwrap();
    assert_eq!(graph.len(), 3);

    let a = graph.find_by_name("a").unwrap();
    let b = graph.find_by_name("b").unwrap();
    let c = graph.find_by_name("c").unwrap();
    assert_eq!(graph.predecessors(b), vec![a]);
    let mut preds = graph.predecessors(c);
    preds.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(preds, expected);
    assert_eq!(graph.guard(c), Some(TaskGuard::AllAncestorsSucceeded));
    assert_eq!(graph.lock_objects(c).unwrap().len(), 1);
}

#[tokio::test]
async fn sample_config_runs_end_to_end() {
    init_tracing();
    let cfg = validate(SAMPLE).unwrap();
    let graph = graph_from_config(&cfg).unwrap();

    let engine = JobEngine::new(cfg.engine_config());
    let summary = with_timeout(engine.submit(cfg.job.name.clone(), graph).unwrap().wait()).await;

    assert_eq!(summary.state, JobState::Failed);
    assert_eq!(summary.task_state("lock_da"), Some(TaskState::Passed));
    assert_eq!(summary.task_state("push_config"), Some(TaskState::Failed));
    assert_eq!(summary.task_state("unlock_da"), Some(TaskState::Passed));
    assert_eq!(
        summary.report("push_config").unwrap().error.as_deref(),
        Some("manager refused config")
    );
    assert_eq!(engine.locks().held_count(), 0);
}
