// src/derived/dependency_resolver.rs

//! Effective mtimes over discovered dependency sets.
//!
//! A file is considered changed when it changed itself or when anything it
//! (transitively) depends on changed more recently. The resolver stats the
//! file, discovers its dependencies (cached per file mtime), executes every
//! dependency concurrently and records `max(own, deps...)` as the file's
//! mtime marker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::{BoxFuture, try_join_all};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{StructuredExecutor, create_shared};
use crate::context::{Context, get_mtime, set_mtime};
use crate::errors::{Result, TaskchainError};
use crate::path_resolvers::PathFilter;
use crate::pipeline::SharedExecutor;
use crate::storage::{
    CachedDependencies, DependencyStore, InnerStateStore, default_dependencies_key,
    default_inner_state_key,
};
use crate::task::{Task, TaskName};

pub struct DependencyResolverState<S> {
    pub selector: PathFilter,
    /// Defaults to `<name>.innerState`.
    pub inner_state_key: Option<String>,
    /// Defaults to `<name>.dependencies`.
    pub dependencies_key: Option<String>,
    pub settings: S,
}

pub trait FileDependencyResolver: Send + Sync + 'static {
    type Options;
    type Settings: Send + Sync + 'static;
    type InnerState: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn init(&self, options: Self::Options) -> Result<DependencyResolverState<Self::Settings>>;

    fn read_source<'a>(
        &'a self,
        state: &'a DependencyResolverState<Self::Settings>,
        task: &'a Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Self::InnerState>>;

    /// Dependency paths of `task`, absolute or relative to the context base
    /// path.
    fn read_dependencies<'a>(
        &'a self,
        state: &'a DependencyResolverState<Self::Settings>,
        task: &'a Task,
        inner: &'a Self::InnerState,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Vec<PathBuf>>>;
}

/// Runs a [`FileDependencyResolver`] as a structured executor.
pub struct DependencyResolverExecutor<R> {
    resolver: R,
}

impl<R: FileDependencyResolver> DependencyResolverExecutor<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn into_executor(self, options: R::Options) -> Result<SharedExecutor> {
        create_shared(Arc::new(self), options)
    }

    async fn inner_state(
        &self,
        state: &DependencyResolverState<R::Settings>,
        task: &Task,
        path: &Path,
        mtime: SystemTime,
        context: &Context,
    ) -> Result<R::InnerState> {
        let name = self.resolver.name();
        let key = state
            .inner_state_key
            .clone()
            .unwrap_or_else(|| default_inner_state_key(name));
        let store = InnerStateStore::<R::InnerState>::new(context.storage(), &key);
        if let Some(inner) = store.get_fresh(path, mtime).await? {
            context.log(name, task, "reusing cached state");
            return Ok(inner);
        }
        context.log(name, task, "reading input...");
        let inner = self.resolver.read_source(state, task, context).await?;
        context.log(name, task, "done reading input");
        store.set(path, mtime, &inner).await?;
        Ok(inner)
    }

    /// Dependency list of `path`, from the cache while the file is unchanged.
    async fn dependencies(
        &self,
        state: &DependencyResolverState<R::Settings>,
        task: &Task,
        path: &Path,
        mtime: SystemTime,
        context: &Context,
    ) -> Result<Vec<PathBuf>> {
        let name = self.resolver.name();
        let key = state
            .dependencies_key
            .clone()
            .unwrap_or_else(|| default_dependencies_key(name));
        let store = DependencyStore::<R::InnerState>::new(context.storage(), &key);
        if let Some(entry) = store.get_fresh(path, mtime).await? {
            context.log(name, task, "using cached dependencies");
            return Ok(entry.deps);
        }

        let inner = self.inner_state(state, task, path, mtime, context).await?;
        context.log(name, task, "reading dependencies...");
        let deps = self
            .resolver
            .read_dependencies(state, task, &inner, context)
            .await?;
        context.log(name, task, "done reading dependencies");
        let entry = CachedDependencies {
            mtime,
            deps,
            inner_state: inner,
        };
        store.set(path, &entry).await?;
        Ok(entry.deps)
    }

    /// Resolve the effective mtime of `task`, or `None` when it is not a
    /// selected file.
    pub async fn resolve(
        &self,
        state: &DependencyResolverState<R::Settings>,
        task: Task,
        context: &Context,
    ) -> Result<Option<Task>> {
        let name = self.resolver.name();
        let TaskName::File(file) = task.name() else {
            return Ok(None);
        };
        let path = file.path().to_path_buf();
        if !(state.selector)(&path) {
            return Ok(None);
        }

        let own = context
            .fs()
            .modified(&path)
            .await
            .map_err(|source| TaskchainError::Stat {
                path: path.clone(),
                source,
            })?;

        let deps = self.dependencies(state, &task, &path, own, context).await?;

        let effective = if deps.is_empty() {
            context.log(name, &task, "no dependencies");
            own
        } else {
            let listed: Vec<String> = deps.iter().map(|d| d.display().to_string()).collect();
            context.log(
                name,
                &task,
                &format!("processing dependencies => {}", listed.join(",")),
            );
            let mtimes =
                try_join_all(deps.iter().map(|dep| dependency_mtime(dep, own, context))).await?;
            context.log(name, &task, "done processing dependencies");
            mtimes.into_iter().fold(own, SystemTime::max)
        };

        let updated = set_mtime(&task, effective, Some(context)).await?;
        context.log(name, &task, "done");
        Ok(Some(updated))
    }
}

/// Execute one dependency and report its known mtime, or `fallback` when it
/// has none.
async fn dependency_mtime(dep: &Path, fallback: SystemTime, context: &Context) -> Result<SystemTime> {
    let task = context
        .execute(Task::file(dep, Some(context.base_path())))
        .await?;
    Ok(get_mtime(&task, context).await?.unwrap_or(fallback))
}

impl<R: FileDependencyResolver> StructuredExecutor for DependencyResolverExecutor<R> {
    type Options = R::Options;
    type State = DependencyResolverState<R::Settings>;

    fn name(&self) -> &str {
        self.resolver.name()
    }

    fn init(&self, options: R::Options) -> Result<Self::State> {
        self.resolver.init(options)
    }

    fn execute<'a>(
        &'a self,
        state: &'a Self::State,
        task: Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Task>>> {
        Box::pin(self.resolve(state, task, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::path_resolvers::extension_filter;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Each line `use <file>` names a sibling dependency.
    struct Uses {
        reads: AtomicUsize,
    }

    impl FileDependencyResolver for Uses {
        type Options = ();
        type Settings = ();
        type InnerState = Vec<String>;

        fn name(&self) -> &str {
            "uses"
        }

        fn init(&self, _options: ()) -> Result<DependencyResolverState<()>> {
            Ok(DependencyResolverState {
                selector: extension_filter("m"),
                inner_state_key: None,
                dependencies_key: None,
                settings: (),
            })
        }

        fn read_source<'a>(
            &'a self,
            _state: &'a DependencyResolverState<()>,
            task: &'a Task,
            context: &'a Context,
        ) -> BoxFuture<'a, Result<Vec<String>>> {
            Box::pin(async move {
                self.reads.fetch_add(1, Ordering::SeqCst);
                let text = context.get_contents_string(task).await?;
                Ok(text
                    .lines()
                    .filter_map(|l| l.strip_prefix("use "))
                    .map(str::to_string)
                    .collect())
            })
        }

        fn read_dependencies<'a>(
            &'a self,
            _state: &'a DependencyResolverState<()>,
            task: &'a Task,
            inner: &'a Vec<String>,
            _context: &'a Context,
        ) -> BoxFuture<'a, Result<Vec<PathBuf>>> {
            let dir = task.path().and_then(Path::parent).map(Path::to_path_buf);
            Box::pin(async move {
                let dir = dir.unwrap_or_default();
                Ok(inner.iter().map(|name| dir.join(name)).collect())
            })
        }
    }

    fn setup() -> Result<(MockFileSystem, Context, DependencyResolverExecutor<Uses>)> {
        let fs = MockFileSystem::new();
        let executor = DependencyResolverExecutor::new(Uses {
            reads: AtomicUsize::new(0),
        });
        let shared = DependencyResolverExecutor::new(Uses {
            reads: AtomicUsize::new(0),
        })
        .into_executor(())?;
        let ctx = Context::new(
            "/p",
            vec![shared].into(),
            Arc::new(MemoryStorage::new()),
            Arc::new(fs.clone()),
        );
        Ok((fs, ctx, executor))
    }

    #[tokio::test]
    async fn without_dependencies_the_own_mtime_is_kept() -> Result<()> {
        let (fs, ctx, executor) = setup()?;
        let own = fs.add_file("/p/leaf.m", "nothing here");
        let state = executor.init(())?;

        let out = executor
            .resolve(&state, Task::file("/p/leaf.m", None), &ctx)
            .await?;

        assert_eq!(out.and_then(|t| t.state().mtime), Some(own));
        Ok(())
    }

    #[tokio::test]
    async fn effective_mtime_is_the_max_over_dependencies() -> Result<()> {
        let (fs, ctx, executor) = setup()?;
        let a = fs.add_file("/p/a.m", "");
        fs.add_file("/p/main.m", "use a.m\nuse b.m\n");
        let b = fs.add_file("/p/b.m", "");
        assert!(b > a);
        let state = executor.init(())?;

        let out = executor
            .resolve(&state, Task::file("/p/main.m", None), &ctx)
            .await?;

        assert_eq!(out.and_then(|t| t.state().mtime), Some(b));
        assert_eq!(fs.mtime("/p/main.m").map(|m| m < b), Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn dependency_lists_are_cached_per_file_mtime() -> Result<()> {
        let (fs, ctx, executor) = setup()?;
        fs.add_file("/p/main.m", "use dep.m\n");
        fs.add_file("/p/dep.m", "");
        let state = executor.init(())?;

        executor.resolve(&state, Task::file("/p/main.m", None), &ctx).await?;
        executor.resolve(&state, Task::file("/p/main.m", None), &ctx).await?;
        assert_eq!(executor.resolver().reads.load(Ordering::SeqCst), 1);

        fs.touch("/p/main.m")?;
        executor.resolve(&state, Task::file("/p/main.m", None), &ctx).await?;
        assert_eq!(executor.resolver().reads.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_files_fail_with_a_stat_error() -> Result<()> {
        let (_fs, ctx, executor) = setup()?;
        let state = executor.init(())?;

        let err = executor
            .resolve(&state, Task::file("/p/ghost.m", None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(&err, TaskchainError::Stat { path, .. } if path == Path::new("/p/ghost.m")));
        assert!(err.to_string().starts_with("unable to stat file"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn dependencies_without_mtime_fall_back_to_the_file() -> Result<()> {
        let (fs, ctx, executor) = setup()?;
        let own = fs.add_file("/p/main.m", "use generated.txt\n");
        let state = executor.init(())?;

        let out = executor
            .resolve(&state, Task::file("/p/main.m", None), &ctx)
            .await?;

        assert_eq!(out.and_then(|t| t.state().mtime), Some(own));
        Ok(())
    }
}
