// src/context/mod.rs

//! Per-root-execution environment.
//!
//! A [`Context`] owns:
//! - the ordered executor pipeline,
//! - an in-memory content cache (lives as long as the context),
//! - handles to the [`Storage`] backend and the [`FileSystem`],
//! - elapsed-time bookkeeping for log lines.
//!
//! [`Context::execute`] threads a task through every executor in order. It
//! never skips a stage; executors decide for themselves whether a task is
//! theirs to handle.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::errors::{Result, TaskchainError};
use crate::fs::FileSystem;
use crate::pipeline::SharedExecutor;
use crate::storage::Storage;
use crate::task::{Contents, Task, TaskKey, TaskName};

pub mod mtime;

pub use mtime::{get_mtime, set_mtime};

pub struct Context {
    base_path: PathBuf,
    executors: Arc<[SharedExecutor]>,
    storage: Arc<dyn Storage>,
    fs: Arc<dyn FileSystem>,
    content_cache: Mutex<HashMap<TaskKey, Contents>>,
    origin: Mutex<Instant>,
}

tokio::task_local! {
    /// Start of the innermost [`Context::execute`] currently being polled.
    static EXECUTE_STARTED: Instant;
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("base_path", &self.base_path)
            .field("executors", &self.executors.len())
            .field("storage", &self.storage)
            .field("fs", &self.fs)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn format_ms(duration: Duration) -> String {
    format!("{:.3}ms", duration.as_secs_f64() * 1000.0)
}

impl Context {
    pub fn new(
        base_path: impl Into<PathBuf>,
        executors: Arc<[SharedExecutor]>,
        storage: Arc<dyn Storage>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            executors,
            storage,
            fs,
            content_cache: Mutex::new(HashMap::new()),
            origin: Mutex::new(Instant::now()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Reset the context-wide elapsed-time origin.
    pub fn reset_counters(&self) {
        *lock(&self.origin) = Instant::now();
    }

    /// Time since the enclosing [`Context::execute`] call started, if any.
    ///
    /// Each call tracks its own start, so concurrent executions of the same
    /// task do not share one.
    pub fn task_elapsed(&self) -> Option<Duration> {
        EXECUTE_STARTED.try_with(Instant::elapsed).ok()
    }

    /// Emit a log line with the elapsed time since the enclosing
    /// [`Context::execute`] started and since the last
    /// [`Context::reset_counters`].
    pub fn log(&self, op: &str, task: &Task, message: &str) {
        let task_elapsed = self
            .task_elapsed()
            .map(format_ms)
            .unwrap_or_else(|| "--".to_string());
        let total_elapsed = format_ms(lock(&self.origin).elapsed());
        info!(
            op,
            task = %task.name(),
            task_ms = %task_elapsed,
            total_ms = %total_elapsed,
            "{message}"
        );
    }

    /// Run `task` through every executor, in registration order.
    ///
    /// An executor returning `Some(task)` replaces the current task for all
    /// following stages; `None` keeps it.
    pub fn execute(&self, task: Task) -> BoxFuture<'_, Result<Task>> {
        Box::pin(async move {
            let stages = async move {
                let mut current = task;
                for executor in self.executors.iter() {
                    if let Some(next) = executor.execute(current.clone(), self).await? {
                        current = next;
                    }
                }
                Ok(current)
            };
            EXECUTE_STARTED.scope(Instant::now(), stages).await
        })
    }

    /// Contents of `task`: stashed state first, then the content cache, then
    /// the file itself (which populates the cache).
    pub async fn get_contents(&self, task: &Task) -> Result<Contents> {
        if let Some(contents) = &task.state().contents {
            return Ok(contents.clone());
        }

        let TaskName::File(file) = task.name() else {
            return Err(TaskchainError::NoContents(task.name().to_string()));
        };

        let key = task.name().key();
        if let Some(cached) = lock(&self.content_cache).get(&key) {
            debug!(path = ?file.path(), "content cache hit");
            return Ok(cached.clone());
        }

        let bytes = self.fs.read(file.path()).await?;
        let contents: Contents = bytes.into();
        lock(&self.content_cache).insert(key, contents.clone());
        Ok(contents)
    }

    /// [`Context::get_contents`] decoded as UTF-8.
    pub async fn get_contents_string(&self, task: &Task) -> Result<String> {
        let contents = self.get_contents(task).await?;
        let text = std::str::from_utf8(&contents)
            .with_context(|| format!("contents of {} are not valid UTF-8", task.name()))?;
        Ok(text.to_string())
    }

    /// Store `data` as the contents of `task`.
    ///
    /// The content cache is always updated. With `persist`, the file is
    /// written (parent directories created first), re-stated and its mtime
    /// marker updated; persisting a logical task is an error. The returned
    /// task carries the contents in its state.
    pub async fn save_contents(
        &self,
        task: &Task,
        data: impl Into<Contents>,
        persist: bool,
    ) -> Result<Task> {
        let data: Contents = data.into();
        lock(&self.content_cache).insert(task.name().key(), data.clone());

        let mut result = task.with_contents(data.clone());
        if persist {
            let TaskName::File(file) = task.name() else {
                return Err(TaskchainError::NotPersistable(task.name().to_string()));
            };
            if let Some(parent) = file.path().parent() {
                self.fs.create_dir_all(parent).await?;
            }
            self.fs.write(file.path(), &data).await?;
            let mtime = self.fs.modified(file.path()).await.map_err(|source| {
                TaskchainError::Stat {
                    path: file.path().to_path_buf(),
                    source,
                }
            })?;
            result = set_mtime(&result, mtime, Some(self)).await?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::pipeline::{self, SharedExecutor};
    use crate::storage::{MemoryStorage, MtimeStore};
    use crate::task::TaskState;

    fn context_with(executors: Vec<SharedExecutor>, fs: &MockFileSystem) -> Context {
        Context::new(
            "/p",
            executors.into(),
            Arc::new(MemoryStorage::new()),
            Arc::new(fs.clone()),
        )
    }

    #[tokio::test]
    async fn execute_folds_through_stages_in_order() -> Result<()> {
        let append = |tag: &'static str| {
            pipeline::from_fn(tag, move |task, _ctx| {
                Box::pin(async move {
                    let mut state = task.state().clone();
                    let seen = state
                        .extra
                        .get("seen")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    state = state.with_extra("seen", format!("{seen}{tag}").into());
                    Ok(Some(task.update_state(state)))
                })
            })
        };
        let skip = pipeline::from_fn("skip", |_task, _ctx| Box::pin(async { Ok(None) }));

        let fs = MockFileSystem::new();
        let ctx = context_with(vec![append("a"), skip, append("b")], &fs);
        let out = ctx.execute(Task::logical("build")).await?;

        assert_eq!(out.state().extra["seen"], serde_json::json!("ab"));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_runs_of_one_task_time_themselves() -> Result<()> {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let elapsed = Arc::new(Mutex::new(Vec::new()));
        let timed = {
            let calls = Arc::clone(&calls);
            let elapsed = Arc::clone(&elapsed);
            pipeline::from_fn("timed", move |_task: Task, ctx: &Context| {
                let nth = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let elapsed = Arc::clone(&elapsed);
                Box::pin(async move {
                    if nth == 0 {
                        std::thread::sleep(Duration::from_millis(30));
                        tokio::task::yield_now().await;
                    }
                    lock(&elapsed).push((nth, ctx.task_elapsed()));
                    Ok(None)
                })
            })
        };

        let fs = MockFileSystem::new();
        let ctx = context_with(vec![timed], &fs);
        let (first, second) = futures::join!(
            ctx.execute(Task::logical("build")),
            ctx.execute(Task::logical("build"))
        );
        first?;
        second?;

        let elapsed = lock(&elapsed).clone();
        let of = |nth: usize| {
            elapsed
                .iter()
                .find(|(n, _)| *n == nth)
                .and_then(|(_, d)| *d)
                .unwrap()
        };
        assert!(of(0) >= Duration::from_millis(30), "{elapsed:?}");
        assert!(of(1) < of(0), "{elapsed:?}");
        assert_eq!(ctx.task_elapsed(), None);
        Ok(())
    }

    #[tokio::test]
    async fn contents_prefer_state_then_cache_then_disk() -> Result<()> {
        let fs = MockFileSystem::new();
        fs.add_file("/p/a.txt", "disk");
        let ctx = context_with(Vec::new(), &fs);
        let task = Task::file("a.txt", Some(Path::new("/p")));

        assert_eq!(ctx.get_contents_string(&task).await?, "disk");
        assert_eq!(ctx.get_contents_string(&task).await?, "disk");
        assert_eq!(fs.read_count(), 1);

        let stashed = task.update_state(TaskState::default().with_contents(b"state".to_vec()));
        assert_eq!(ctx.get_contents_string(&stashed).await?, "state");
        Ok(())
    }

    #[tokio::test]
    async fn logical_tasks_without_contents_fail() {
        let fs = MockFileSystem::new();
        let ctx = context_with(Vec::new(), &fs);
        let err = ctx.get_contents(&Task::logical("build")).await.unwrap_err();
        assert!(matches!(err, TaskchainError::NoContents(name) if name == "build"));
    }

    #[tokio::test]
    async fn save_contents_persists_files_and_records_mtime() -> Result<()> {
        let fs = MockFileSystem::new();
        let ctx = context_with(Vec::new(), &fs);
        let task = Task::file("out/deep/app.js", Some(Path::new("/p")));

        let saved = ctx.save_contents(&task, b"js".to_vec(), true).await?;

        let path = Path::new("/p/out/deep/app.js");
        assert!(fs.is_dir("/p/out/deep"));
        assert_eq!(fs.contents(path), Some(b"js".to_vec()));
        assert_eq!(saved.state().mtime, fs.mtime(path));
        assert_eq!(MtimeStore::new(ctx.storage()).get(path).await?, fs.mtime(path));
        assert_eq!(saved.state().contents.as_deref(), Some(&b"js"[..]));
        Ok(())
    }

    /// Writes land in the inner mock; every stat fails.
    #[derive(Debug)]
    struct StatFails(MockFileSystem);

    impl FileSystem for StatFails {
        fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, anyhow::Result<Vec<u8>>> {
            self.0.read(path)
        }

        fn write<'a>(
            &'a self,
            path: &'a Path,
            contents: &'a [u8],
        ) -> BoxFuture<'a, anyhow::Result<()>> {
            self.0.write(path, contents)
        }

        fn modified<'a>(
            &'a self,
            path: &'a Path,
        ) -> BoxFuture<'a, anyhow::Result<std::time::SystemTime>> {
            Box::pin(async move { Err(anyhow::anyhow!("permission denied: {:?}", path)) })
        }

        fn create_dir_all<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, anyhow::Result<()>> {
            self.0.create_dir_all(path)
        }
    }

    #[tokio::test]
    async fn save_contents_fails_when_the_written_file_cannot_be_stated() -> Result<()> {
        let fs = MockFileSystem::new();
        let ctx = Context::new(
            "/p",
            Vec::<SharedExecutor>::new().into(),
            Arc::new(MemoryStorage::new()),
            Arc::new(StatFails(fs.clone())),
        );
        let task = Task::file("out/app.js", Some(Path::new("/p")));

        let err = ctx
            .save_contents(&task, b"js".to_vec(), true)
            .await
            .unwrap_err();

        let path = Path::new("/p/out/app.js");
        assert!(matches!(&err, TaskchainError::Stat { path: p, .. } if p == path));
        assert_eq!(fs.contents(path), Some(b"js".to_vec()));
        assert_eq!(MtimeStore::new(ctx.storage()).get(path).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn save_contents_without_persist_only_caches() -> Result<()> {
        let fs = MockFileSystem::new();
        let ctx = context_with(Vec::new(), &fs);
        let task = Task::file("/p/tmp.txt", None);

        ctx.save_contents(&task, b"cached".to_vec(), false).await?;

        assert_eq!(fs.write_count(), 0);
        assert_eq!(ctx.get_contents_string(&task).await?, "cached");
        Ok(())
    }

    #[tokio::test]
    async fn persisting_a_logical_task_is_an_error() {
        let fs = MockFileSystem::new();
        let ctx = context_with(Vec::new(), &fs);
        let err = ctx
            .save_contents(&Task::logical("bundle"), b"x".to_vec(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskchainError::NotPersistable(_)));
        assert_eq!(fs.write_count(), 0);
    }
}
