// src/derived/file_mapper.rs

//! One source file in, one derived file out.
//!
//! For a selected target the mapper resolves and executes the source task,
//! compares mtimes and only regenerates when the source is strictly newer
//! than the target. The parsed source ("inner state") is cached in storage
//! keyed by the source path and reused while the source is unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{StructuredExecutor, create_shared};
use crate::context::{Context, get_mtime};
use crate::errors::{Result, TaskchainError};
use crate::path_resolvers::{PathFilter, PathResolver};
use crate::pipeline::SharedExecutor;
use crate::storage::{InnerStateStore, default_inner_state_key};
use crate::task::{Task, TaskName};

/// Immutable configuration of a file mapper.
pub struct FileMapperState<S> {
    /// Maps a target path (and its base path) to the source path.
    pub source_resolver: PathResolver,
    /// Targets this mapper is responsible for.
    pub selector: PathFilter,
    /// Storage namespace for cached inner state; defaults to
    /// `<name>.innerState`.
    pub inner_state_key: Option<String>,
    pub settings: S,
}

/// What [`FileMapperExecutor::map`] did with a task.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// Not a selected file target.
    Skipped,
    /// The target is at least as new as its source. Carries the target with
    /// its known mtime stashed.
    UpToDate(Task),
    /// The target was regenerated and written.
    Regenerated(Task),
}

impl MapOutcome {
    pub fn recomputed(&self) -> bool {
        matches!(self, MapOutcome::Regenerated(_))
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            MapOutcome::Skipped => None,
            MapOutcome::UpToDate(task) | MapOutcome::Regenerated(task) => Some(task),
        }
    }

    pub fn into_task(self) -> Option<Task> {
        match self {
            MapOutcome::Skipped => None,
            MapOutcome::UpToDate(task) | MapOutcome::Regenerated(task) => Some(task),
        }
    }
}

/// A concrete derivation: how to read a source and generate a target.
pub trait FileMapper: Send + Sync + 'static {
    type Options;
    type Settings: Send + Sync + 'static;
    type InnerState: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn init(&self, options: Self::Options) -> Result<FileMapperState<Self::Settings>>;

    /// Parse the source task into the inner state.
    fn read_source<'a>(
        &'a self,
        state: &'a FileMapperState<Self::Settings>,
        source: &'a Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Self::InnerState>>;

    /// Adjust the inner state for one particular target.
    fn process<'a>(
        &'a self,
        _state: &'a FileMapperState<Self::Settings>,
        _task: &'a Task,
        _source: &'a Task,
        inner: Self::InnerState,
        _context: &'a Context,
    ) -> BoxFuture<'a, Result<Self::InnerState>> {
        Box::pin(async move { Ok(inner) })
    }

    fn generate<'a>(
        &'a self,
        state: &'a FileMapperState<Self::Settings>,
        task: &'a Task,
        inner: &'a Self::InnerState,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;

    fn post_process<'a>(
        &'a self,
        _state: &'a FileMapperState<Self::Settings>,
        _task: &'a Task,
        _inner: &'a Self::InnerState,
        contents: Vec<u8>,
        _context: &'a Context,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move { Ok(contents) })
    }

    /// Build the task for a resolved source path.
    fn create_source_task(
        &self,
        _state: &FileMapperState<Self::Settings>,
        _target: &Task,
        source: &Path,
        context: &Context,
    ) -> Task {
        Task::file(source, Some(context.base_path()))
    }
}

/// Runs a [`FileMapper`] as a structured executor.
pub struct FileMapperExecutor<M> {
    mapper: M,
}

impl<M: FileMapper> FileMapperExecutor<M> {
    pub fn new(mapper: M) -> Self {
        Self { mapper }
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Initialize with `options` and erase into a pipeline executor.
    pub fn into_executor(self, options: M::Options) -> Result<SharedExecutor> {
        create_shared(Arc::new(self), options)
    }

    /// Bring `task` up to date with its source.
    pub async fn map(
        &self,
        state: &FileMapperState<M::Settings>,
        task: Task,
        context: &Context,
    ) -> Result<MapOutcome> {
        let name = self.mapper.name();
        let TaskName::File(file) = task.name() else {
            return Ok(MapOutcome::Skipped);
        };
        let target = file.path().to_path_buf();
        if !(state.selector)(&target) {
            return Ok(MapOutcome::Skipped);
        }
        let base: Option<PathBuf> = file.base_path().map(Path::to_path_buf);

        let Some(source_path) = state.source_resolver.resolve(&target, base.as_deref()) else {
            return Err(TaskchainError::Resolution {
                target,
                base: base.unwrap_or_else(|| context.base_path().to_path_buf()),
            });
        };
        let source = self
            .mapper
            .create_source_task(state, &task, &source_path, context);
        context.log(name, &task, &format!("resolved source => {}", source.name()));
        let source = context.execute(source).await?;

        let mtime = get_mtime(&task, context).await?;
        let source_mtime = get_mtime(&source, context).await?;
        if let (Some(mtime), Some(source_mtime)) = (mtime, source_mtime) {
            if source_mtime <= mtime {
                context.log(name, &task, "up to date");
                return Ok(MapOutcome::UpToDate(task.with_mtime(mtime)));
            }
        }

        let key = state
            .inner_state_key
            .clone()
            .unwrap_or_else(|| default_inner_state_key(name));
        let store = InnerStateStore::<M::InnerState>::new(context.storage(), &key);
        let cache_slot = source.path().zip(source_mtime);

        let cached = match cache_slot {
            Some((path, mtime)) => store.get_fresh(path, mtime).await?,
            None => None,
        };
        let inner = match cached {
            Some(inner) => {
                context.log(name, &task, "reusing cached state");
                inner
            }
            None => {
                context.log(name, &task, "reading input...");
                let inner = self.mapper.read_source(state, &source, context).await?;
                context.log(name, &task, "done reading input");
                if let Some((path, mtime)) = cache_slot {
                    store.set(path, mtime, &inner).await?;
                }
                inner
            }
        };

        let inner = self
            .mapper
            .process(state, &task, &source, inner, context)
            .await?;
        context.log(name, &task, "generating output...");
        let contents = self.mapper.generate(state, &task, &inner, context).await?;
        context.log(name, &task, "done generating");
        let contents = self
            .mapper
            .post_process(state, &task, &inner, contents, context)
            .await?;

        context.log(name, &task, "saving...");
        let saved = context.save_contents(&task, contents, true).await?;
        context.log(name, &task, "done");
        Ok(MapOutcome::Regenerated(saved))
    }

    async fn run(
        &self,
        state: &FileMapperState<M::Settings>,
        task: Task,
        context: &Context,
    ) -> Result<Option<Task>> {
        Ok(self.map(state, task, context).await?.into_task())
    }
}

impl<M: FileMapper> StructuredExecutor for FileMapperExecutor<M> {
    type Options = M::Options;
    type State = FileMapperState<M::Settings>;

    fn name(&self) -> &str {
        self.mapper.name()
    }

    fn init(&self, options: M::Options) -> Result<Self::State> {
        self.mapper.init(options)
    }

    fn execute<'a>(
        &'a self,
        state: &'a Self::State,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>> {
        Box::pin(self.run(state, task, context))
    }
}
