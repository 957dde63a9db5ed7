// src/config/mod.rs

//! Configuration loading and validation for jobgraph.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate task references, lock syntax and DAG correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{ConfigFile, EngineSection, JobSection, RawConfigFile, RawTaskConfig, TaskConfig};
pub use validate::dependency_order;
