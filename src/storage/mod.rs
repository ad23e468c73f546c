// src/storage/mod.rs

//! Pluggable key/value persistence for cross-run metadata.
//!
//! The raw [`Storage`] trait only knows string keys. The engine never builds
//! keys by hand: it goes through [`StorageKey`] and the typed stores below
//! ([`MtimeStore`], [`InnerStateStore`], [`DependencyStore`]), so the three
//! cache kinds cannot collide by accident.
//!
//! Key layout:
//! - `!mtime!<absolute path>`
//! - `!<inner state key>!<absolute path>`
//! - `!<dependencies key>!<absolute path>`
//!
//! Paths are written verbatim except that `%` becomes `%25` and bytes that
//! are not valid UTF-8 become `%XX`, so distinct paths never share a key.

use std::fmt::{self, Debug, Write as _};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Async key/value store.
///
/// Implementations must provide exact-match lookups and round-trip arbitrary
/// JSON values unchanged.
pub trait Storage: Send + Sync + Debug {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;
    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;
    fn set_object<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>>;
    fn clear<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Namespaced storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKey<'a> {
    Mtime(&'a Path),
    InnerState { namespace: &'a str, path: &'a Path },
    Dependencies { namespace: &'a str, path: &'a Path },
}

impl fmt::Display for StorageKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKey::Mtime(path) => write!(f, "!mtime!{}", KeyPath(path)),
            StorageKey::InnerState { namespace, path }
            | StorageKey::Dependencies { namespace, path } => {
                write!(f, "!{}!{}", namespace, KeyPath(path))
            }
        }
    }
}

/// Injective text form of a path.
struct KeyPath<'a>(&'a Path);

impl fmt::Display for KeyPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_os_str().as_encoded_bytes();
        for chunk in bytes.utf8_chunks() {
            for c in chunk.valid().chars() {
                match c {
                    '%' => f.write_str("%25")?,
                    c => f.write_char(c)?,
                }
            }
            for b in chunk.invalid() {
                write!(f, "%{b:02X}")?;
            }
        }
        Ok(())
    }
}

/// Default inner-state namespace for an executor.
pub fn default_inner_state_key(executor: &str) -> String {
    format!("{executor}.innerState")
}

/// Default dependency-set namespace for an executor.
pub fn default_dependencies_key(executor: &str) -> String {
    format!("{executor}.dependencies")
}

/// Read and deserialize an entry. A value that does not deserialize into `T`
/// is reported as absent.
async fn read_entry<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    let Some(value) = storage.get_object(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(entry) => Ok(Some(entry)),
        Err(err) => {
            debug!(key, error = %err, "ignoring malformed cache entry");
            Ok(None)
        }
    }
}

async fn write_entry<T: Serialize>(storage: &dyn Storage, key: &str, entry: &T) -> Result<()> {
    let value = serde_json::to_value(entry)?;
    storage.set_object(key, value).await
}

/// Persisted mtime markers.
#[derive(Clone, Copy)]
pub struct MtimeStore<'a> {
    storage: &'a dyn Storage,
}

impl<'a> MtimeStore<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    pub async fn get(&self, path: &Path) -> Result<Option<SystemTime>> {
        read_entry(self.storage, &StorageKey::Mtime(path).to_string()).await
    }

    pub async fn set(&self, path: &Path, mtime: SystemTime) -> Result<()> {
        write_entry(self.storage, &StorageKey::Mtime(path).to_string(), &mtime).await
    }

    pub async fn clear(&self, path: &Path) -> Result<()> {
        self.storage.clear(&StorageKey::Mtime(path).to_string()).await
    }
}

/// A cached inner state together with the source mtime it was derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedState<T> {
    pub mtime: SystemTime,
    pub value: T,
}

/// A cached dependency set for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDependencies<T> {
    pub mtime: SystemTime,
    pub deps: Vec<PathBuf>,
    pub inner_state: T,
}

/// Whether an entry recorded at `recorded` still describes a source whose
/// current mtime is `current`.
pub fn is_fresh(recorded: SystemTime, current: SystemTime) -> bool {
    recorded >= current
}

/// Inner states keyed by namespace + source path.
pub struct InnerStateStore<'a, T> {
    storage: &'a dyn Storage,
    namespace: &'a str,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Serialize + DeserializeOwned> InnerStateStore<'a, T> {
    pub fn new(storage: &'a dyn Storage, namespace: &'a str) -> Self {
        Self {
            storage,
            namespace,
            _marker: PhantomData,
        }
    }

    fn key(&self, path: &Path) -> String {
        StorageKey::InnerState {
            namespace: self.namespace,
            path,
        }
        .to_string()
    }

    /// Cached value for `path`, only if still valid for `source_mtime`.
    pub async fn get_fresh(&self, path: &Path, source_mtime: SystemTime) -> Result<Option<T>> {
        let entry: Option<CachedState<T>> = read_entry(self.storage, &self.key(path)).await?;
        Ok(entry
            .filter(|cached| is_fresh(cached.mtime, source_mtime))
            .map(|cached| cached.value))
    }

    pub async fn set(&self, path: &Path, mtime: SystemTime, value: &T) -> Result<()>
    where
        T: Clone,
    {
        let entry = CachedState {
            mtime,
            value: value.clone(),
        };
        write_entry(self.storage, &self.key(path), &entry).await
    }
}

/// Dependency sets keyed by namespace + file path.
pub struct DependencyStore<'a, T> {
    storage: &'a dyn Storage,
    namespace: &'a str,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Serialize + DeserializeOwned> DependencyStore<'a, T> {
    pub fn new(storage: &'a dyn Storage, namespace: &'a str) -> Self {
        Self {
            storage,
            namespace,
            _marker: PhantomData,
        }
    }

    fn key(&self, path: &Path) -> String {
        StorageKey::Dependencies {
            namespace: self.namespace,
            path,
        }
        .to_string()
    }

    pub async fn get_fresh(
        &self,
        path: &Path,
        mtime: SystemTime,
    ) -> Result<Option<CachedDependencies<T>>> {
        let entry: Option<CachedDependencies<T>> = read_entry(self.storage, &self.key(path)).await?;
        Ok(entry.filter(|cached| is_fresh(cached.mtime, mtime)))
    }

    pub async fn set(&self, path: &Path, entry: &CachedDependencies<T>) -> Result<()> {
        write_entry(self.storage, &self.key(path), entry).await
    }
}
