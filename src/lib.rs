// src/lib.rs

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod lock;
pub mod logging;
pub mod propagate;
pub mod sim;
pub mod transaction;
pub mod types;

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::TaskGraph;
use crate::engine::{JobEngine, JobSummary};
use crate::types::JobState;

/// High-level entry point used by `main.rs`.
///
/// Loads the config, builds the job graph, runs it on a fresh engine and
/// prints one line per task. Ctrl-C aborts the job.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let graph = sim::graph_from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &graph);
        return Ok(());
    }

    let mut engine_config = cfg.engine_config();
    if let Some(size) = args.task_pool_size {
        if size == 0 {
            bail!("--task-pool-size must be >= 1");
        }
        engine_config.task_pool_size = size;
    }

    let engine = JobEngine::new(engine_config);
    let handle = engine.submit(cfg.job.name.clone(), graph)?;
    info!(job_id = %handle.id(), job = %handle.name(), "job submitted");

    // Ctrl-C -> abort the job.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            handle.abort("interrupted by user");
        });
    }

    let summary = handle.wait().await;
    engine.shutdown("job finished").await;

    print_summary(&summary);

    match summary.state {
        JobState::Completed => Ok(()),
        state => bail!(
            "job '{}' ended {}: {}",
            summary.name,
            state,
            summary
                .failure_reason
                .as_deref()
                .unwrap_or("no reason recorded")
        ),
    }
}

fn print_summary(summary: &JobSummary) {
    println!("{} '{}': {}", summary.id, summary.name, summary.state);
    for report in &summary.reports {
        match &report.error {
            Some(err) => println!("  {:<8} {} ({err})", report.state, report.name),
            None => println!("  {:<8} {}", report.state, report.name),
        }
    }
}

/// Print tasks, dependencies, guards and locks without running anything.
fn print_dry_run(cfg: &ConfigFile, graph: &TaskGraph) {
    println!("jobgraph dry-run: job '{}'", cfg.job.name);
    println!("  engine.task_pool_size = {}", cfg.engine.task_pool_size);
    println!("  engine.job_pool_size = {}", cfg.engine.job_pool_size);
    println!();

    println!("tasks ({}), in execution order:", graph.len());
    for id in graph.topological_order() {
        let Some(name) = graph.name_of(id) else {
            continue;
        };
        println!("  - {name}");
        let Some(task) = cfg.task.get(name) else {
            continue;
        };
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
            println!("      guard: {:?}", task.guard);
        }
        if !task.locks.is_empty() {
            let locks: Vec<String> = task.locks.iter().map(ToString::to_string).collect();
            println!("      locks: {locks:?}");
        }
        if task.sleep_ms > 0 {
            println!("      sleep_ms: {}", task.sleep_ms);
        }
        if task.fail {
            println!("      fail: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
