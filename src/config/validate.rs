// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, StorageKind};
use crate::errors::{Result, TaskchainError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskchainError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.task))
    }
}

/// Run every check against an already-built config.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_raw_config(&RawConfigFile {
        config: cfg.config.clone(),
        task: cfg.task.clone(),
    })
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_task_names(cfg)?;
    validate_requires(cfg)?;
    validate_acyclic(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TaskchainError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.storage == StorageKind::File && cfg.config.storage_dir.as_os_str().is_empty() {
        return Err(TaskchainError::ConfigError(
            "[config].storage_dir must not be empty when storage = \"file\"".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_names(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.task.keys() {
        if name.trim().is_empty() {
            return Err(TaskchainError::ConfigError(
                "task names must not be empty".to_string(),
            ));
        }
        // Such a name would be classified as a file on the command line.
        if name.contains(std::path::is_separator) {
            return Err(TaskchainError::ConfigError(format!(
                "task name '{name}' must not contain a path separator"
            )));
        }
    }
    Ok(())
}

fn validate_requires(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.requires.iter().any(|r| r.trim().is_empty()) {
            return Err(TaskchainError::ConfigError(format!(
                "task '{name}' has an empty entry in `requires`"
            )));
        }
        for dep in task.logical_requires() {
            if dep == name {
                return Err(TaskchainError::ConfigError(format!(
                    "task '{name}' cannot require itself"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(TaskchainError::ConfigError(format!(
                    "task '{name}' requires unknown task '{dep}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_acyclic(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: requirement -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in cfg.task.iter() {
        for dep in task.logical_requires() {
            graph.add_edge(dep, name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TaskchainError::RequiresCycle(format!(
            "cycle detected in `requires` involving task '{}'",
            cycle.node_id()
        ))),
    }
}
