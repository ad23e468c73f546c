// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
struct MockFile {
    contents: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<PathBuf, MockFile>,
    dirs: HashSet<PathBuf>,
    /// Seconds since the epoch handed out by the logical clock.
    clock: u64,
    reads: usize,
    writes: Vec<PathBuf>,
    stats: usize,
}

impl MockState {
    fn tick(&mut self) -> SystemTime {
        self.clock += 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.clock)
    }

    fn ensure_dir(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() || !self.dirs.insert(ancestor.to_path_buf()) {
                break;
            }
        }
    }
}

/// In-memory file system with a logical clock.
///
/// Every mutation advances the clock by one second, so later writes always
/// carry a strictly newer mtime. Reads, writes and stats are counted so tests
/// can assert on idempotence.
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut state = MockState {
            clock: 1_000_000,
            ..MockState::default()
        };
        state.dirs.insert(PathBuf::from("/"));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a file, creating parent directories implicitly.
    /// Returns the mtime assigned to it. Not counted as a write.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> SystemTime {
        let path = path.as_ref();
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            state.ensure_dir(parent);
        }
        let modified = state.tick();
        state.files.insert(
            path.to_path_buf(),
            MockFile {
                contents: content.into(),
                modified,
            },
        );
        modified
    }

    /// Bump the mtime of an existing file to "now" on the logical clock.
    pub fn touch(&self, path: impl AsRef<Path>) -> Result<SystemTime> {
        let mut state = self.lock();
        let modified = state.tick();
        match state.files.get_mut(path.as_ref()) {
            Some(file) => {
                file.modified = modified;
                Ok(modified)
            }
            None => Err(anyhow!("File not found: {:?}", path.as_ref())),
        }
    }

    /// Force a specific mtime on an existing file.
    pub fn set_modified(&self, path: impl AsRef<Path>, modified: SystemTime) -> Result<()> {
        let mut state = self.lock();
        match state.files.get_mut(path.as_ref()) {
            Some(file) => {
                file.modified = modified;
                Ok(())
            }
            None => Err(anyhow!("File not found: {:?}", path.as_ref())),
        }
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.lock().files.remove(path.as_ref()).is_some()
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).map(|f| f.contents.clone())
    }

    pub fn mtime(&self, path: impl AsRef<Path>) -> Option<SystemTime> {
        self.lock().files.get(path.as_ref()).map(|f| f.modified)
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        self.lock().dirs.contains(path.as_ref())
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Paths written through [`FileSystem::write`], in order.
    pub fn written_paths(&self) -> Vec<PathBuf> {
        self.lock().writes.clone()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    pub fn stat_count(&self) -> usize {
        self.lock().stats
    }

    /// Reset all I/O counters; file contents and mtimes are kept.
    pub fn reset_counters(&self) {
        let mut state = self.lock();
        state.reads = 0;
        state.stats = 0;
        state.writes.clear();
    }
}

impl FileSystem for MockFileSystem {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.reads += 1;
            match state.files.get(path) {
                Some(file) => Ok(file.contents.clone()),
                None if state.dirs.contains(path) => Err(anyhow!("Is a directory: {:?}", path)),
                None => Err(anyhow!("File not found: {:?}", path)),
            }
        })
    }

    fn write<'a>(&'a self, path: &'a Path, contents: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            let parent_exists = path
                .parent()
                .is_none_or(|parent| state.dirs.contains(parent));
            if !parent_exists {
                return Err(anyhow!("Parent directory missing: {:?}", path));
            }
            let modified = state.tick();
            state.writes.push(path.to_path_buf());
            state.files.insert(
                path.to_path_buf(),
                MockFile {
                    contents: contents.to_vec(),
                    modified,
                },
            );
            Ok(())
        })
    }

    fn modified<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<SystemTime>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.stats += 1;
            state
                .files
                .get(path)
                .map(|f| f.modified)
                .ok_or_else(|| anyhow!("File not found: {:?}", path))
        })
    }

    fn create_dir_all<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.lock().ensure_dir(path);
            Ok(())
        })
    }
}
