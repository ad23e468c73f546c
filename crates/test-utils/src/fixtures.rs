//! Executors and derived-file implementations shared by the integration
//! tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use taskchain::context::Context;
use taskchain::derived::{
    DependencyResolverState, FileDependencyResolver, FileMapper, FileMapperState,
};
use taskchain::errors::Result;
use taskchain::path_resolvers::{ReversePathResolver, ReversePathResolverConfig, extension_filter};
use taskchain::pipeline::{SharedExecutor, from_fn};
use taskchain::task::{Task, TaskName};

/// An executor that records every task it sees and never changes it.
pub fn recording(seen: &Arc<Mutex<Vec<TaskName>>>) -> SharedExecutor {
    let seen = Arc::clone(seen);
    from_fn("record", move |task, _ctx| {
        seen.lock().unwrap().push(task.name().clone());
        Box::pin(async { Ok(None) })
    })
}

/// An executor that yields `delays[path]` times before letting a file task
/// continue, so concurrent siblings complete in a chosen order.
pub fn yielding(delays: HashMap<PathBuf, usize>) -> SharedExecutor {
    from_fn("yield", move |task, _ctx| {
        let n = task.path().and_then(|p| delays.get(p)).copied().unwrap_or(0);
        Box::pin(async move {
            for _ in 0..n {
                tokio::task::yield_now().await;
            }
            Ok(None)
        })
    })
}

/// "Compiles" `<root>/src/**/*.ts` into `<root>/out/**/*.js` by prefixing a
/// banner. Counts `read_source` and `generate` calls.
#[derive(Default)]
pub struct CompileTs {
    reads: AtomicUsize,
    generates: AtomicUsize,
}

impl CompileTs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn generates(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }
}

impl FileMapper for CompileTs {
    /// Project root.
    type Options = PathBuf;
    type Settings = ();
    type InnerState = String;

    fn name(&self) -> &str {
        "compile-ts"
    }

    fn init(&self, root: PathBuf) -> Result<FileMapperState<()>> {
        let source_resolver = ReversePathResolver::from_config(ReversePathResolverConfig {
            source_root: Some("src".into()),
            target_root: Some("out".into()),
            common_root: Some(root),
            source_ext: Some(".ts".into()),
            target_ext: Some(".js".into()),
            ..ReversePathResolverConfig::default()
        })?;
        Ok(FileMapperState {
            source_resolver,
            selector: extension_filter("js"),
            inner_state_key: None,
            settings: (),
        })
    }

    fn read_source<'a>(
        &'a self,
        _state: &'a FileMapperState<()>,
        source: &'a Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            context.get_contents_string(source).await
        })
    }

    fn generate<'a>(
        &'a self,
        _state: &'a FileMapperState<()>,
        _task: &'a Task,
        inner: &'a String,
        _context: &'a Context,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.generates.fetch_add(1, Ordering::SeqCst);
            Ok(format!("// compiled\n{inner}").into_bytes())
        })
    }
}

/// Discovers `#include "x"` lines in `.c` and `.h` files. Included paths are
/// relative to the including file.
#[derive(Default)]
pub struct IncludeResolver {
    reads: AtomicUsize,
}

impl IncludeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FileDependencyResolver for IncludeResolver {
    type Options = ();
    type Settings = ();
    type InnerState = Vec<String>;

    fn name(&self) -> &str {
        "includes"
    }

    fn init(&self, _options: ()) -> Result<DependencyResolverState<()>> {
        let c = extension_filter("c");
        let h = extension_filter("h");
        Ok(DependencyResolverState {
            selector: Arc::new(move |path: &Path| c(path) || h(path)),
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
                .filter_map(|line| line.trim().strip_prefix("#include "))
                .map(|rest| rest.trim_matches('"').to_string())
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
        let dir = task
            .path()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Box::pin(async move { Ok(inner.iter().map(|inc| dir.join(inc)).collect()) })
    }
}
