// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, RawTaskConfig, TaskConfig};
use crate::errors::{JobgraphError, Result};
use crate::lock::{LockObjectReference, LockSet};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = JobgraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let mut tasks = BTreeMap::new();
        for (name, task) in raw.task {
            let locks = parse_locks(&name, &task)?;
            tasks.insert(
                name,
                TaskConfig {
                    after: task.after,
                    guard: task.guard,
                    locks,
                    sleep_ms: task.sleep_ms,
                    fail: task.fail,
                    fail_message: task.fail_message,
                },
            );
        }

        Ok(ConfigFile::new_unchecked(raw.engine, raw.job, tasks))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_engine_config(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(JobgraphError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.task_pool_size == 0 {
        return Err(JobgraphError::ConfigError(
            "[engine].task_pool_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.engine.job_pool_size == 0 {
        return Err(JobgraphError::ConfigError(
            "[engine].job_pool_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.job.name.trim().is_empty() {
        return Err(JobgraphError::ConfigError(
            "[job].name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(JobgraphError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(JobgraphError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn parse_locks(name: &str, task: &RawTaskConfig) -> Result<LockSet> {
    task.locks
        .iter()
        .map(|raw| {
            raw.parse::<LockObjectReference>().map_err(|e| {
                JobgraphError::ConfigError(format!(
                    "task '{}' has invalid lock '{}': {}",
                    name, raw, e
                ))
            })
        })
        .collect()
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(JobgraphError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}

/// Task names in an order where every task comes after its `after` list.
pub fn dependency_order(cfg: &ConfigFile) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    toposort(&graph, None)
        .map(|order| order.into_iter().map(str::to_string).collect())
        .map_err(|cycle| {
            JobgraphError::DagCycle(format!(
                "cycle detected in task DAG involving task '{}'",
                cycle.node_id()
            ))
        })
}
