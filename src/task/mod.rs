// src/task/mod.rs

//! Task data model: a name plus an immutable, typed state.
//!
//! State is never mutated in place. Every helper that changes a field builds a
//! new [`TaskState`] with struct-update syntax so that fields written by other
//! pipeline stages are carried forward.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

pub mod name;

pub use name::{FileName, LogicalName, TaskKey, TaskName};

/// Shared, immutable content bytes.
pub type Contents = Arc<[u8]>;

/// Per-task metadata threaded through the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskState {
    /// Last modification time known to the framework (the mtime marker).
    pub mtime: Option<SystemTime>,
    /// Contents stashed by an earlier stage.
    pub contents: Option<Contents>,
    /// Free-form fields for user executors.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TaskState {
    pub fn with_mtime(self, mtime: SystemTime) -> Self {
        Self {
            mtime: Some(mtime),
            ..self
        }
    }

    pub fn with_contents(self, contents: impl Into<Contents>) -> Self {
        Self {
            contents: Some(contents.into()),
            ..self
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A named unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    name: TaskName,
    state: TaskState,
}

impl Task {
    pub fn new(name: impl Into<TaskName>) -> Self {
        Self::with_state(name, TaskState::default())
    }

    pub fn with_state(name: impl Into<TaskName>, state: TaskState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    /// File-backed task for `path`, resolved against `base_path`.
    pub fn file(path: impl AsRef<Path>, base_path: Option<&Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        Self::new(FileName::new(path, base_path))
    }

    pub fn logical(name: impl Into<String>) -> Self {
        Self::new(LogicalName::new(name))
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Path of a file-backed task.
    pub fn path(&self) -> Option<&Path> {
        self.name.as_file().map(FileName::path)
    }

    /// New task with the same name and the given state; `self` is untouched.
    pub fn update_state(&self, state: TaskState) -> Task {
        Task {
            name: self.name.clone(),
            state,
        }
    }

    pub fn with_mtime(&self, mtime: SystemTime) -> Task {
        self.update_state(self.state.clone().with_mtime(mtime))
    }

    pub fn with_contents(&self, contents: impl Into<Contents>) -> Task {
        self.update_state(self.state.clone().with_contents(contents))
    }
}
