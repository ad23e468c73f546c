#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use taskchain::context::Context;
use taskchain::derived::{
    DependencyResolverExecutor, FileMapper, FileMapperExecutor, MapOutcome, create_shared,
};
use taskchain::errors::Result;
use taskchain::fs::mock::MockFileSystem;
use taskchain::pipeline::{SharedExecutor, store_mtime, subtask};
use taskchain::runner::Runner;
use taskchain::storage::MemoryStorage;
use taskchain::task::Task;
use taskchain_test_utils::fixtures::{CompileTs, IncludeResolver};

pub use taskchain_test_utils::{init_tracing, with_timeout};

pub const ROOT: &str = "/p";

/// `build` requires `out/app.js`, which is compiled from `src/app.ts`.
pub struct BuildProject {
    pub fs: MockFileSystem,
    pub storage: Arc<MemoryStorage>,
    pub compiler: Arc<FileMapperExecutor<CompileTs>>,
    pub runner: Runner,
}

impl BuildProject {
    pub fn new() -> Result<Self> {
        init_tracing();
        let fs = MockFileSystem::new();
        let storage = Arc::new(MemoryStorage::new());
        let compiler = Arc::new(FileMapperExecutor::new(CompileTs::new()));

        let executors: Vec<SharedExecutor> = vec![
            subtask("build", |ctx: &Context| {
                let app = Task::file("out/app.js", Some(ctx.base_path()));
                Box::pin(async move { Ok(vec![app]) })
            }),
            create_shared(Arc::clone(&compiler), ROOT.into())?,
            store_mtime(None),
        ];
        let runner = Runner::new(executors)
            .with_storage(storage.clone())
            .with_file_system(Arc::new(fs.clone()));

        Ok(Self {
            fs,
            storage,
            compiler,
            runner,
        })
    }

    pub async fn build(&self) -> Result<Task> {
        self.runner.execute("build", Some(Path::new(ROOT))).await
    }

    pub fn reads(&self) -> usize {
        self.compiler.mapper().reads()
    }

    /// Run only the compiler on `out/app.js`, in a fresh context, and
    /// report what it did.
    pub async fn map_app(&self) -> Result<MapOutcome> {
        let root = Path::new(ROOT);
        let state = self.compiler.mapper().init(root.to_path_buf())?;
        let context = self.runner.create_context(root);
        self.compiler
            .map(&state, Task::file("out/app.js", Some(root)), &context)
            .await
    }
}

/// Dependency resolution over `.c`/`.h` files, with `extra` executors run
/// before the resolver.
pub struct IncludeProject {
    pub fs: MockFileSystem,
    pub resolver: Arc<DependencyResolverExecutor<IncludeResolver>>,
    pub runner: Runner,
}

impl IncludeProject {
    pub fn new(extra: Vec<SharedExecutor>) -> Result<Self> {
        init_tracing();
        let fs = MockFileSystem::new();
        let resolver = Arc::new(DependencyResolverExecutor::new(IncludeResolver::new()));

        let mut executors = extra;
        executors.push(create_shared(Arc::clone(&resolver), ())?);
        let runner = Runner::new(executors).with_file_system(Arc::new(fs.clone()));

        Ok(Self {
            fs,
            resolver,
            runner,
        })
    }

    pub async fn resolve(&self, file: &str) -> Result<Task> {
        self.runner.execute(file, Some(Path::new(ROOT))).await
    }

    pub fn reads(&self) -> usize {
        self.resolver.resolver().reads()
    }
}
