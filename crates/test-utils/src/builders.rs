#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use taskchain::config::{ConfigFile, ConfigSection, RawConfigFile, StorageKind, TaskConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
    origin: Option<PathBuf>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                task: BTreeMap::new(),
            },
            origin: None,
        }
    }

    /// Add `[task.<name>]` requiring `requires`.
    pub fn with_task(mut self, name: &str, requires: &[&str]) -> Self {
        self.config.task.insert(
            name.to_string(),
            TaskConfig {
                requires: requires.iter().map(|r| r.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config.base_path = Some(path.into());
        self
    }

    pub fn with_file_storage(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.config.storage = StorageKind::File;
        self.config.config.storage_dir = dir.into();
        self
    }

    /// Directory relative paths are anchored at.
    pub fn with_origin(mut self, dir: impl Into<PathBuf>) -> Self {
        self.origin = Some(dir.into());
        self
    }

    pub fn build(self) -> ConfigFile {
        let cfg = ConfigFile::try_from(self.config)
            .expect("Failed to build valid config from builder");
        match self.origin {
            Some(origin) => cfg.with_origin(origin),
            None => cfg,
        }
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `contents` as `Taskchain.toml` inside `dir` and return its path.
pub fn write_config(dir: &std::path::Path, contents: &str) -> PathBuf {
    let path = dir.join("Taskchain.toml");
    std::fs::write(&path, contents).expect("failed to write config file");
    path
}
