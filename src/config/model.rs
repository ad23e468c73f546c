// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::task::name::{absolute, normalize};

/// Configuration exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// base_path = "."
/// watch_path = "src"
/// storage = "file"
/// storage_dir = ".taskchain"
///
/// [task.build]
/// requires = ["src/app.ts", "assets"]
///
/// [task.assets]
/// requires = ["static/logo.svg"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[task.<name>]`, keyed by logical task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Base path for task names. Relative values are resolved against the
    /// directory holding the config file.
    #[serde(default)]
    pub base_path: Option<PathBuf>,

    /// Directory to watch; defaults to the base path.
    #[serde(default)]
    pub watch_path: Option<PathBuf>,

    #[serde(default)]
    pub storage: StorageKind,

    /// Where `storage = "file"` keeps its document, relative to the base
    /// path.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".taskchain")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            base_path: None,
            watch_path: None,
            storage: StorageKind::default(),
            storage_dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Cached metadata lives for one process.
    #[default]
    Memory,
    /// Cached metadata is kept in a JSON document across runs.
    File,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    /// Tasks executed, concurrently, when this task runs. Entries containing
    /// a path separator are files; anything else names another task.
    #[serde(default)]
    pub requires: Vec<String>,
}

impl TaskConfig {
    /// Requirements naming other configured tasks.
    pub fn logical_requires(&self) -> impl Iterator<Item = &str> {
        self.requires
            .iter()
            .map(String::as_str)
            .filter(|r| !r.contains(std::path::is_separator))
    }
}

/// Validated configuration.
///
/// Built through `TryFrom<RawConfigFile>` (see `validate.rs`), so holding one
/// means requirement references resolve and contain no cycles.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub task: BTreeMap<String, TaskConfig>,
    /// Directory the config was loaded from, if any.
    origin: Option<PathBuf>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, task: BTreeMap<String, TaskConfig>) -> Self {
        Self {
            config,
            task,
            origin: None,
        }
    }

    /// Anchor relative paths at `dir`.
    pub fn with_origin(mut self, dir: impl Into<PathBuf>) -> Self {
        self.origin = Some(dir.into());
        self
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn tasks(&self) -> &BTreeMap<String, TaskConfig> {
        &self.task
    }

    /// Absolute base path: `[config].base_path` resolved against the origin,
    /// else the origin, else the working directory.
    pub fn base_path(&self) -> PathBuf {
        let origin = self.origin.as_deref().map(absolute);
        let resolved = match (&self.config.base_path, origin) {
            (Some(base), _) if base.is_absolute() => base.clone(),
            (Some(base), Some(origin)) => origin.join(base),
            (Some(base), None) => absolute(base),
            (None, Some(origin)) => origin,
            (None, None) => absolute(Path::new(".")),
        };
        normalize(&resolved)
    }

    /// Absolute watch root, defaulting to the base path.
    pub fn watch_path(&self) -> PathBuf {
        let base = self.base_path();
        match &self.config.watch_path {
            Some(path) => normalize(&base.join(path)),
            None => base,
        }
    }

    /// Absolute storage directory.
    pub fn storage_dir(&self) -> PathBuf {
        normalize(&self.base_path().join(&self.config.storage_dir))
    }
}
