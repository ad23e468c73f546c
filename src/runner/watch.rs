// src/runner/watch.rs

use std::future::Future;
use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::Runner;
use crate::errors::Result;
use crate::task::TaskName;

pub(crate) type WatchEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Keeps the underlying `RecommendedWatcher` alive. Dropping it stops
/// watching and closes the event channel.
pub(crate) struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch `root` recursively, forwarding every notify result (errors
/// included) into an async channel.
///
/// The root is canonicalized first; notify reports event paths under the
/// resolved directory.
pub(crate) fn spawn_watcher(root: &Path) -> Result<(WatcherHandle, WatchEvents)> {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            // The receiver only goes away once the watch loop has ended.
            let _ = event_tx.send(res);
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    debug!(root = %root.display(), "watcher started");

    Ok((WatcherHandle { _inner: watcher }, event_rx))
}

/// `path` with its longest existing ancestor resolved through symlinks.
/// Paths that do not exist yet keep their trailing components.
fn canonical_prefix(path: &Path) -> PathBuf {
    for ancestor in path.ancestors() {
        if let Ok(resolved) = ancestor.canonicalize() {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => resolved.join(rest),
                _ => resolved,
            };
        }
    }
    path.to_path_buf()
}

/// Every ignored prefix, spelled both as configured and as resolved on
/// disk.
fn ignore_prefixes(ignored: &[PathBuf]) -> Vec<PathBuf> {
    let mut prefixes = ignored.to_vec();
    for path in ignored {
        let resolved = canonical_prefix(path);
        if !prefixes.contains(&resolved) {
            prefixes.push(resolved);
        }
    }
    prefixes
}

/// Paths of `event` that should trigger a re-run.
fn changed_paths(ignored: &[PathBuf], event: &Event) -> Vec<PathBuf> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| !ignored.iter().any(|prefix| path.starts_with(prefix)))
        .cloned()
        .collect()
}

/// Re-run `name` once for every relevant event, in arrival order.
///
/// Access events and events whose paths all fall under an ignored prefix are
/// skipped. Ends with `Ok` when the event channel closes or `shutdown`
/// completes, and with the watch error when notify reports one. Failing runs
/// are logged and do not end the watch.
pub(crate) async fn drive<F>(
    runner: &Runner,
    name: &TaskName,
    base_path: &Path,
    events: &mut WatchEvents,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let ignored = ignore_prefixes(runner.ignored());

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => {
                info!("watch stopped");
                return Ok(());
            }
            event = events.recv() => event,
        };

        let Some(event) = event else {
            debug!("watch channel closed");
            return Ok(());
        };
        let changed = changed_paths(&ignored, &event?);
        if changed.is_empty() {
            continue;
        }

        for path in &changed {
            info!(path = %path.display(), "changed");
        }
        match runner.execute_name(name.clone(), base_path).await {
            Ok(task) => debug!(task = %task.name(), "watch run finished"),
            Err(err) => error!(error = %err, task = %name, "watch run failed"),
        }
    }
}
