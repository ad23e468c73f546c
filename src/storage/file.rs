// src/storage/file.rs

use std::path::{Path, PathBuf};

use anyhow::Context;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Storage;
use super::memory::value_as_string;
use crate::errors::Result;

/// File name of the storage document inside the storage directory.
///
/// The effective path on disk is `<dir>/storage.json`.
pub const STORAGE_FILE_NAME: &str = "storage.json";

/// Stores all entries in a single JSON document on disk.
///
/// The document is loaded lazily on first access and rewritten after every
/// mutation, so a crash between runs loses at most the in-flight write.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: Mutex<Option<Map<String, Value>>>,
}

impl FileStorage {
    /// Storage backed by `<dir>/storage.json`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STORAGE_FILE_NAME),
            data: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let map = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing storage file at {:?}", self.path))?;
                debug!(path = ?self.path, "loaded storage file");
                Ok(map)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(anyhow::Error::from(err)
                .context(format!("reading storage file at {:?}", self.path))
                .into()),
        }
    }

    async fn save(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating storage directory at {:?}", parent))?;
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("writing storage file at {:?}", self.path))?;
        Ok(())
    }

    async fn read_with<T>(&self, f: impl FnOnce(&Map<String, Value>) -> T) -> Result<T> {
        let mut guard = self.data.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let map = guard.get_or_insert_with(Map::new);
        Ok(f(map))
    }

    async fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        let mut guard = self.data.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let map = guard.get_or_insert_with(Map::new);
        f(map);
        self.save(map).await
    }

    /// Remove every entry and delete nothing else on disk.
    pub async fn clear_all(&self) -> Result<()> {
        self.update(|map| {
            let removed = map.len();
            map.clear();
            info!(removed, "cleared storage file");
        })
        .await
    }
}

impl Storage for FileStorage {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.read_with(move |map| map.get(key).map(value_as_string)))
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.update(move |map| {
            map.insert(key.to_string(), Value::String(value));
        }))
    }

    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(self.read_with(move |map| map.get(key).cloned()))
    }

    fn set_object<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.update(move |map| {
            map.insert(key.to_string(), value);
        }))
    }

    fn clear<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.update(move |map| {
            map.remove(key);
        }))
    }
}
