// src/pipeline/builtin.rs

//! Stock executors.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, try_join_all};
use tracing::debug;

use super::{Executor, SharedExecutor};
use crate::context::Context;
use crate::errors::Result;
use crate::storage::MtimeStore;
use crate::task::{Task, TaskName};

/// Picks the path an executor should act on, or `None` to skip the task.
pub type PathSelector = Arc<dyn Fn(&Task) -> Option<PathBuf> + Send + Sync>;

/// Selects the path of any file-backed task.
pub fn is_file() -> PathSelector {
    Arc::new(|task: &Task| task.path().map(|p| p.to_path_buf()))
}

struct NamedTask {
    name: String,
    action: SharedExecutor,
}

impl Executor for NamedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(
        &'a self,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>> {
        match task.name() {
            TaskName::Logical(logical) if logical.name() == self.name => {
                self.action.execute(task, context)
            }
            _ => Box::pin(async { Ok(None) }),
        }
    }
}

/// Run `action` only for the logical task called `name`.
pub fn task(name: impl Into<String>, action: SharedExecutor) -> SharedExecutor {
    Arc::new(NamedTask {
        name: name.into(),
        action,
    })
}

struct Subtask<F> {
    name: String,
    action: F,
}

impl<F> Subtask<F>
where
    F: for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<Vec<Task>>> + Send + Sync,
{
    async fn run(&self, task: Task, context: &Context) -> Result<Option<Task>> {
        let TaskName::Logical(logical) = task.name() else {
            return Ok(None);
        };
        if logical.name() != self.name {
            return Ok(None);
        }
        let tasks = (self.action)(context).await?;
        context.log(&self.name, &task, &format!("executing {} subtasks", tasks.len()));
        try_join_all(tasks.into_iter().map(|t| context.execute(t))).await?;
        Ok(None)
    }
}

impl<F> Executor for Subtask<F>
where
    F: for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<Vec<Task>>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(
        &'a self,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>> {
        Box::pin(self.run(task, context))
    }
}

/// For the logical task `name`, execute every task produced by `action`
/// concurrently. The logical task itself is left unchanged.
pub fn subtask<F>(name: impl Into<String>, action: F) -> SharedExecutor
where
    F: for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<Vec<Task>>> + Send + Sync + 'static,
{
    Arc::new(Subtask {
        name: name.into(),
        action,
    })
}

#[derive(Clone, Copy)]
enum ContentsOp {
    Preload,
    Save,
    StoreMtime,
}

struct SelectedPath {
    op: ContentsOp,
    selector: PathSelector,
}

impl SelectedPath {
    async fn run(&self, task: Task, context: &Context) -> Result<Option<Task>> {
        let Some(path) = (self.selector)(&task) else {
            return Ok(None);
        };
        match self.op {
            ContentsOp::Preload => {
                if task.state().contents.is_some() {
                    return Ok(None);
                }
                let contents = context.get_contents(&task).await?;
                Ok(Some(task.with_contents(contents)))
            }
            ContentsOp::Save => {
                let data = context.get_contents(&task).await?;
                let saved = context.save_contents(&task, data, true).await?;
                Ok(Some(saved))
            }
            ContentsOp::StoreMtime => {
                match context.fs().modified(&path).await {
                    Ok(mtime) => MtimeStore::new(context.storage()).set(&path, mtime).await?,
                    Err(err) => debug!(?path, error = %err, "no mtime to store"),
                }
                Ok(None)
            }
        }
    }
}

impl Executor for SelectedPath {
    fn name(&self) -> &str {
        match self.op {
            ContentsOp::Preload => "preload-contents",
            ContentsOp::Save => "save-contents",
            ContentsOp::StoreMtime => "store-mtime",
        }
    }

    fn execute<'a>(
        &'a self,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>> {
        Box::pin(self.run(task, context))
    }
}

/// Stash the contents of selected tasks in their state.
pub fn preload_contents(selector: PathSelector) -> SharedExecutor {
    Arc::new(SelectedPath {
        op: ContentsOp::Preload,
        selector,
    })
}

/// Persist the (possibly stashed) contents of selected tasks to disk.
pub fn save_contents(selector: PathSelector) -> SharedExecutor {
    Arc::new(SelectedPath {
        op: ContentsOp::Save,
        selector,
    })
}

/// Record the current file-system mtime of selected tasks in storage.
/// Defaults to every file-backed task.
pub fn store_mtime(selector: Option<PathSelector>) -> SharedExecutor {
    Arc::new(SelectedPath {
        op: ContentsOp::StoreMtime,
        selector: selector.unwrap_or_else(is_file),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::pipeline::from_fn;
    use crate::storage::MemoryStorage;
    use std::path::Path;
    use std::sync::Mutex;

    fn context(fs: &MockFileSystem, executors: Vec<SharedExecutor>) -> Context {
        Context::new(
            "/p",
            executors.into(),
            Arc::new(MemoryStorage::new()),
            Arc::new(fs.clone()),
        )
    }

    #[tokio::test]
    async fn task_only_matches_its_logical_name() -> Result<()> {
        let hit = from_fn("hit", |task, _ctx| {
            Box::pin(async move { Ok(Some(task.with_extra_flag())) })
        });
        let fs = MockFileSystem::new();
        let ctx = context(&fs, vec![task("build", hit)]);

        let built = ctx.execute(Task::logical("build")).await?;
        let other = ctx.execute(Task::logical("test")).await?;

        assert!(built.state().extra.contains_key("hit"));
        assert!(!other.state().extra.contains_key("hit"));
        Ok(())
    }

    trait FlagExt {
        fn with_extra_flag(&self) -> Task;
    }

    impl FlagExt for Task {
        fn with_extra_flag(&self) -> Task {
            self.update_state(self.state().clone().with_extra("hit", true.into()))
        }
    }

    #[tokio::test]
    async fn subtask_executes_every_produced_task() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = Arc::clone(&seen);
            from_fn("record", move |task, _ctx| {
                seen.lock().unwrap().push(task.name().to_string());
                Box::pin(async { Ok(None) })
            })
        };
        let all = subtask("all", |ctx: &Context| {
            let base = ctx.base_path().to_path_buf();
            Box::pin(async move {
                Ok(vec![
                    Task::file("a.txt", Some(base.as_path())),
                    Task::file("b.txt", Some(base.as_path())),
                ])
            })
        });
        let fs = MockFileSystem::new();
        let ctx = context(&fs, vec![all, recorder]);

        ctx.execute(Task::logical("all")).await?;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a.txt", "all", "b.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn preload_then_save_round_trips_through_disk() -> Result<()> {
        let fs = MockFileSystem::new();
        fs.add_file("/p/in.txt", "payload");
        let ctx = context(&fs, vec![preload_contents(is_file()), save_contents(is_file())]);

        let out = ctx.execute(Task::file("/p/in.txt", None)).await?;

        assert_eq!(out.state().contents.as_deref(), Some(&b"payload"[..]));
        assert_eq!(fs.written_paths(), vec![Path::new("/p/in.txt").to_path_buf()]);
        assert_eq!(out.state().mtime, fs.mtime("/p/in.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn store_mtime_records_file_mtimes_only() -> Result<()> {
        let fs = MockFileSystem::new();
        let mtime = fs.add_file("/p/a.txt", "a");
        let ctx = context(&fs, vec![store_mtime(None)]);

        ctx.execute(Task::file("/p/a.txt", None)).await?;
        ctx.execute(Task::logical("build")).await?;
        ctx.execute(Task::file("/p/missing.txt", None)).await?;

        let store = MtimeStore::new(ctx.storage());
        assert_eq!(store.get(Path::new("/p/a.txt")).await?, Some(mtime));
        assert_eq!(store.get(Path::new("/p/missing.txt")).await?, None);
        Ok(())
    }
}
