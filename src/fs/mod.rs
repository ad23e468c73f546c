// src/fs/mod.rs

//! File-system seam used by the execution context.
//!
//! Every operation is async so that each stat/read/write is a suspension
//! point. Production code uses [`RealFileSystem`] (backed by `tokio::fs`);
//! tests use [`mock::MockFileSystem`], which keeps a logical clock and counts
//! I/O calls.

use std::fmt::Debug;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use futures::future::BoxFuture;

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Write `contents` to `path`. The parent directory must already exist.
    fn write<'a>(&'a self, path: &'a Path, contents: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Last modification time as reported by the file system.
    fn modified<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<SystemTime>>;

    fn create_dir_all<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<()>>;
}

/// Implementation that uses `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            tokio::fs::read(path)
                .await
                .with_context(|| format!("reading file {:?}", path))
        })
    }

    fn write<'a>(&'a self, path: &'a Path, contents: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tokio::fs::write(path, contents)
                .await
                .with_context(|| format!("writing to file {:?}", path))
        })
    }

    fn modified<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<SystemTime>> {
        Box::pin(async move {
            let meta = tokio::fs::metadata(path)
                .await
                .with_context(|| format!("reading metadata of {:?}", path))?;
            meta.modified()
                .with_context(|| format!("reading mtime of {:?}", path))
        })
    }

    fn create_dir_all<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(path)
                .await
                .with_context(|| format!("creating dir {:?}", path))
        })
    }
}
