// src/runner/mod.rs

//! Top-level entry point.
//!
//! A [`Runner`] owns the executor pipeline and the long-lived collaborators
//! (storage, file system). Each root execution gets a fresh [`Context`], so
//! the content cache never outlives one run.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigFile, StorageKind};
use crate::context::Context;
use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::pipeline::{SharedExecutor, store_mtime, subtask};
use crate::storage::{FileStorage, MemoryStorage, Storage};
use crate::task::name::{absolute, normalize};
use crate::task::{Task, TaskName};

pub mod watch;

pub struct Runner {
    executors: Arc<[SharedExecutor]>,
    storage: Arc<dyn Storage>,
    fs: Arc<dyn FileSystem>,
    /// Paths whose changes never trigger a watch re-run.
    ignored: Vec<PathBuf>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("executors", &self.executors)
            .field("storage", &self.storage)
            .field("fs", &self.fs)
            .field("ignored", &self.ignored)
            .finish()
    }
}

impl Runner {
    /// Runner over `executors` with in-memory storage and the real file
    /// system.
    pub fn new(executors: Vec<SharedExecutor>) -> Self {
        Self {
            executors: executors.into(),
            storage: Arc::new(MemoryStorage::new()),
            fs: Arc::new(RealFileSystem),
            ignored: Vec::new(),
        }
    }

    /// Runner for a validated config: one `subtask` per configured task
    /// executing its `requires`, then `store_mtime` for every file task.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut executors: Vec<SharedExecutor> = cfg
            .tasks()
            .iter()
            .map(|(name, task)| {
                let requires = task.requires.clone();
                subtask(name.clone(), move |ctx: &Context| {
                    let tasks: Vec<Task> = requires
                        .iter()
                        .map(|r| Task::new(TaskName::parse(r, Some(ctx.base_path()))))
                        .collect();
                    Box::pin(async move { Ok(tasks) })
                })
            })
            .collect();
        executors.push(store_mtime(None));

        let runner = Self::new(executors);
        match cfg.config.storage {
            StorageKind::Memory => runner,
            StorageKind::File => {
                let dir = cfg.storage_dir();
                runner
                    .with_storage(Arc::new(FileStorage::new(&dir)))
                    .ignore_changes_under(dir)
            }
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Exclude `path` (and everything below it) from watch triggers.
    pub fn ignore_changes_under(mut self, path: impl AsRef<Path>) -> Self {
        self.ignored.push(normalize(&absolute(path.as_ref())));
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn create_context(&self, base_path: &Path) -> Context {
        Context::new(
            base_path,
            Arc::clone(&self.executors),
            Arc::clone(&self.storage),
            Arc::clone(&self.fs),
        )
    }

    /// Execute `name` (a file when it contains a path separator, otherwise
    /// logical) relative to `base_path`, defaulting to the working directory.
    pub async fn execute(&self, name: &str, base_path: Option<&Path>) -> Result<Task> {
        let base = resolve_base(base_path)?;
        self.execute_name(TaskName::parse(name, Some(base.as_path())), &base)
            .await
    }

    /// Execute an explicit task name.
    pub async fn execute_name(&self, name: TaskName, base_path: &Path) -> Result<Task> {
        let context = self.create_context(base_path);
        context.reset_counters();
        context.execute(Task::new(name)).await
    }

    /// Re-run `name` on every change under `watch_path` until the watch
    /// closes or fails.
    pub async fn watch(
        &self,
        name: &str,
        base_path: Option<&Path>,
        watch_path: Option<&Path>,
    ) -> Result<()> {
        self.watch_until(name, base_path, watch_path, std::future::pending())
            .await
    }

    /// [`Runner::watch`], additionally ending cleanly once `shutdown`
    /// completes.
    pub async fn watch_until<F>(
        &self,
        name: &str,
        base_path: Option<&Path>,
        watch_path: Option<&Path>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let base = resolve_base(base_path)?;
        let task_name = TaskName::parse(name, Some(base.as_path()));
        let root = match watch_path {
            Some(path) if path.is_absolute() => normalize(path),
            Some(path) => normalize(&base.join(path)),
            None => base.clone(),
        };

        let (_handle, mut events) = watch::spawn_watcher(&root)?;
        info!(path = %root.display(), task = %task_name, "watching");
        watch::drive(self, &task_name, &base, &mut events, shutdown).await
    }

    pub(crate) fn ignored(&self) -> &[PathBuf] {
        &self.ignored
    }
}

fn resolve_base(base_path: Option<&Path>) -> Result<PathBuf> {
    match base_path {
        Some(base) => Ok(normalize(&absolute(base))),
        None => Ok(std::env::current_dir()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::pipeline::from_fn;
    use std::sync::Mutex;

    fn recording(seen: &Arc<Mutex<Vec<TaskName>>>) -> SharedExecutor {
        let seen = Arc::clone(seen);
        from_fn("record", move |task, _ctx| {
            seen.lock().unwrap().push(task.name().clone());
            Box::pin(async { Ok(None) })
        })
    }

    #[tokio::test]
    async fn names_are_classified_by_path_separator() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = Runner::new(vec![recording(&seen)])
            .with_file_system(Arc::new(MockFileSystem::new()));

        runner.execute("build", Some(Path::new("/p"))).await?;
        runner.execute("out/app.js", Some(Path::new("/p"))).await?;

        let seen = seen.lock().unwrap().clone();
        assert!(matches!(&seen[0], TaskName::Logical(l) if l.name() == "build"));
        let file = seen[1].as_file().map(|f| f.path().to_path_buf());
        assert_eq!(file, Some(PathBuf::from("/p/out/app.js")));
        Ok(())
    }

    #[test]
    fn ignored_paths_are_normalized() {
        let runner = Runner::new(Vec::new()).ignore_changes_under("/p/src/../.taskchain");
        assert_eq!(runner.ignored(), [PathBuf::from("/p/.taskchain")]);
    }
}
