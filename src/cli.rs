// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskchain`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskchain",
    version,
    about = "Incrementally build tasks, skipping work whose inputs did not change.",
    long_about = None
)]
pub struct CliArgs {
    /// Task to execute: a configured task name, or a file path (anything
    /// containing a path separator).
    ///
    /// May be omitted when the config has exactly one root task.
    #[arg(value_name = "TASK")]
    pub task: Option<String>,

    /// Path to the config file (TOML). Defaults to `Taskchain.toml` in the
    /// working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Drop every recorded mtime and cached state from file storage before
    /// executing, forcing a full rebuild.
    #[arg(long)]
    pub clean: bool,

    /// Keep running and re-execute the task whenever a watched file changes.
    #[arg(long)]
    pub watch: bool,

    /// Directory to watch. Overrides `[config].watch_path`.
    #[arg(long, value_name = "PATH", requires = "watch")]
    pub watch_path: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKCHAIN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate the config and print the task table without
    /// executing anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
