// src/pipeline/mod.rs

//! Executors and their composition.
//!
//! An [`Executor`] is one pipeline stage. It receives the current task and the
//! context and either returns a replacement task (`Some`) or leaves the
//! current one in place (`None`).
//!
//! - [`from_fn`] wraps a closure into an executor.
//! - [`combine`] / [`combine_all`] compose executors sequentially.
//! - [`builtin`] holds the stock executors (`task`, `subtask`,
//!   `preload_contents`, `save_contents`, `store_mtime`).

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::errors::{Result, TaskchainError};
use crate::task::Task;

pub mod builtin;

pub use builtin::{preload_contents, save_contents, store_mtime, subtask, task, PathSelector};

/// A single pipeline stage.
pub trait Executor: Send + Sync {
    /// Name used in logs and for default cache namespaces.
    fn name(&self) -> &str;

    fn execute<'a>(
        &'a self,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>>;
}

/// Executors are shared between the runner and every context it creates.
pub type SharedExecutor = Arc<dyn Executor>;

impl fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").field("name", &self.name()).finish()
    }
}

/// Executor backed by a closure.
pub struct FnExecutor<F> {
    name: String,
    f: F,
}

impl<F> Executor for FnExecutor<F>
where
    F: for<'a> Fn(Task, &'a Context) -> BoxFuture<'a, Result<Option<Task>>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(
        &'a self,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>> {
        (self.f)(task, context)
    }
}

/// Wrap a closure returning a boxed future into a shared executor.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> SharedExecutor
where
    F: for<'a> Fn(Task, &'a Context) -> BoxFuture<'a, Result<Option<Task>>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnExecutor {
        name: name.into(),
        f,
    })
}

/// Sequential composition of two executors.
struct Combined {
    name: String,
    first: SharedExecutor,
    second: SharedExecutor,
}

impl Combined {
    async fn run(&self, task: Task, context: &Context) -> Result<Option<Task>> {
        let next = self.first.execute(task.clone(), context).await?;
        let input = next.clone().unwrap_or(task);
        let result = self.second.execute(input, context).await?;
        Ok(result.or(next))
    }
}

impl Executor for Combined {
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

/// Run `first`, feed its result (or the original task) into `second`, and
/// return `second`'s result, else `first`'s.
pub fn combine(first: SharedExecutor, second: SharedExecutor) -> SharedExecutor {
    let name = format!("{}+{}", first.name(), second.name());
    Arc::new(Combined {
        name,
        first,
        second,
    })
}

/// Left fold of [`combine`] over a non-empty list.
pub fn combine_all(executors: impl IntoIterator<Item = SharedExecutor>) -> Result<SharedExecutor> {
    executors
        .into_iter()
        .reduce(combine)
        .ok_or_else(|| TaskchainError::InvalidUsage("cannot combine an empty executor list".into()))
}
