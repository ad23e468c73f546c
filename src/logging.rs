// src/logging.rs

//! Logging setup for the `taskchain` binary.
//!
//! The filter is built from, in order of precedence:
//! 1. `--log-level`, applied to the `taskchain` target only;
//! 2. `TASKCHAIN_LOG`, any `EnvFilter` directive list
//!    (e.g. `taskchain::derived=debug,info`);
//! 3. [`DEFAULT_DIRECTIVES`].
//!
//! Dependencies (notify in particular) stay at `warn` unless a directive
//! from `TASKCHAIN_LOG` says otherwise. Logs go to stderr.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "TASKCHAIN_LOG";

pub const DEFAULT_DIRECTIVES: &str = "warn,taskchain=info";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let directives = filter_directives(cli_level, std::env::var(LOG_ENV).ok().as_deref());
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter `{directives}`"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn filter_directives(cli_level: Option<LogLevel>, env_value: Option<&str>) -> String {
    if let Some(level) = cli_level {
        return format!("warn,taskchain={}", level_name(level));
    }
    match env_value.map(str::trim) {
        Some(value) if !value.is_empty() && EnvFilter::try_new(value).is_ok() => {
            value.to_string()
        }
        _ => DEFAULT_DIRECTIVES.to_string(),
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_environment_beats_default() {
        assert_eq!(
            filter_directives(Some(LogLevel::Debug), Some("trace")),
            "warn,taskchain=debug"
        );
        assert_eq!(
            filter_directives(None, Some(" taskchain::derived=trace ")),
            "taskchain::derived=trace"
        );
        assert_eq!(filter_directives(None, None), DEFAULT_DIRECTIVES);
        assert_eq!(filter_directives(None, Some("")), DEFAULT_DIRECTIVES);
    }

    #[test]
    fn unparsable_environment_falls_back_to_default() {
        assert_eq!(
            filter_directives(None, Some("taskchain=loudest")),
            DEFAULT_DIRECTIVES
        );
    }
}
