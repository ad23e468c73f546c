// src/derived/mod.rs

//! Structured executors.
//!
//! A [`StructuredExecutor`] separates one-time configuration (`init`) from
//! per-task work (`execute`). [`create_executor`] runs `init` once and wraps
//! the result into a plain pipeline [`Executor`].
//!
//! Two staleness-aware implementations live below:
//! - [`file_mapper`]: one source file derives one target file.
//! - [`dependency_resolver`]: a file's effective mtime is the max over
//!   itself and everything it depends on.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::errors::Result;
use crate::pipeline::{Executor, SharedExecutor};
use crate::task::Task;

pub mod dependency_resolver;
pub mod file_mapper;

pub use dependency_resolver::{
    DependencyResolverExecutor, DependencyResolverState, FileDependencyResolver,
};
pub use file_mapper::{FileMapper, FileMapperExecutor, FileMapperState, MapOutcome};

pub trait StructuredExecutor: Send + Sync + 'static {
    type Options;
    type State: Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Build the immutable per-executor state.
    fn init(&self, options: Self::Options) -> Result<Self::State>;

    fn execute<'a>(
        &'a self,
        state: &'a Self::State,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>>;
}

/// A [`StructuredExecutor`] bound to its initialized state.
pub struct Structured<S: StructuredExecutor> {
    implementation: Arc<S>,
    state: S::State,
}

impl<S: StructuredExecutor> Structured<S> {
    /// The implementation this executor was created from.
    pub fn implementation(&self) -> &Arc<S> {
        &self.implementation
    }

    pub fn state(&self) -> &S::State {
        &self.state
    }
}

impl<S: StructuredExecutor> fmt::Debug for Structured<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Structured")
            .field("name", &self.implementation.name())
            .finish_non_exhaustive()
    }
}

impl<S: StructuredExecutor> Executor for Structured<S> {
    fn name(&self) -> &str {
        self.implementation.name()
    }

    fn execute<'a>(
        &'a self,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>> {
        self.implementation.execute(&self.state, task, context)
    }
}

/// Initialize `implementation` with `options`.
pub fn create_executor<S: StructuredExecutor>(
    implementation: Arc<S>,
    options: S::Options,
) -> Result<Structured<S>> {
    let state = implementation.init(options)?;
    Ok(Structured {
        implementation,
        state,
    })
}

/// [`create_executor`], type-erased for pipeline registration.
pub fn create_shared<S: StructuredExecutor>(
    implementation: Arc<S>,
    options: S::Options,
) -> Result<SharedExecutor> {
    Ok(Arc::new(create_executor(implementation, options)?))
}
