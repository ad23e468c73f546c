// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod derived;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod mutex;
pub mod path_resolvers;
pub mod pipeline;
pub mod runner;
pub mod storage;
pub mod task;

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::{ConfigFile, StorageKind};

pub use crate::context::Context;
pub use crate::errors::{Result as TaskchainResult, TaskchainError};
pub use crate::pipeline::{Executor, SharedExecutor, combine, combine_all, from_fn};
pub use crate::runner::Runner;
pub use crate::storage::{FileStorage, MemoryStorage, Storage};
pub use crate::task::{Task, TaskName};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - clearing file storage (`--clean`)
/// - root task selection
/// - one execution of the root task
/// - (optional) watching, until Ctrl-C
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    if args.clean {
        match cfg.config.storage {
            StorageKind::File => FileStorage::new(cfg.storage_dir()).clear_all().await?,
            StorageKind::Memory => debug!("--clean has nothing to clear with memory storage"),
        }
    }

    let target = select_target(&cfg, args.task.as_deref())?;
    let base = cfg.base_path();
    let runner = Runner::from_config(&cfg);

    info!(task = %target, base = %base.display(), "executing");
    let task = runner.execute(&target, Some(base.as_path())).await?;
    match task.state().mtime {
        Some(mtime) => info!(task = %task.name(), ?mtime, "done"),
        None => info!(task = %task.name(), "done"),
    }

    if !args.watch {
        return Ok(());
    }

    let watch_path = match args.watch_path.as_deref() {
        Some(path) => PathBuf::from(path),
        None => cfg.watch_path(),
    };
    runner
        .watch_until(
            &target,
            Some(base.as_path()),
            Some(watch_path.as_path()),
            shutdown_signal(),
        )
        .await?;
    Ok(())
}

/// Resolves once Ctrl-C is received. A failure to install the handler means
/// the watch only ends with its event stream.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

/// The task named on the command line, or the single root task.
///
/// File names (anything with a path separator) are accepted as-is; logical
/// names must be configured.
fn select_target(cfg: &ConfigFile, requested: Option<&str>) -> Result<String> {
    if let Some(name) = requested {
        if name.contains(std::path::is_separator) || cfg.tasks().contains_key(name) {
            return Ok(name.to_string());
        }
        bail!("unknown task `{name}`");
    }

    let roots = root_tasks(cfg);
    debug!(?roots, "root tasks");
    match roots.as_slice() {
        [root] => Ok(root.clone()),
        [] => bail!("no root task found; name the task to execute"),
        _ => bail!(
            "several root tasks ({}); name the task to execute",
            roots.join(", ")
        ),
    }
}

/// Tasks no other task requires.
fn root_tasks(cfg: &ConfigFile) -> Vec<String> {
    let required: Vec<&str> = cfg
        .tasks()
        .values()
        .flat_map(|task| task.logical_requires())
        .collect();
    cfg.tasks()
        .keys()
        .filter(|name| !required.contains(&name.as_str()))
        .cloned()
        .collect()
}

/// Simple dry-run output: print tasks and their requirements.
fn print_dry_run(cfg: &ConfigFile) {
    println!("taskchain dry-run");
    println!("  config.base_path = {}", cfg.base_path().display());
    println!("  config.watch_path = {}", cfg.watch_path().display());
    match cfg.config.storage {
        StorageKind::Memory => println!("  config.storage = memory"),
        StorageKind::File => println!(
            "  config.storage = file ({})",
            display_relative(&cfg.storage_dir(), &cfg.base_path())
        ),
    }
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        if !task.requires.is_empty() {
            println!("      requires: {:?}", task.requires);
        }
    }

    debug!("dry-run complete (no execution)");
}

fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}
