// src/task/name.rs

//! Task identities.
//!
//! A task is either file-backed ([`FileName`]) or purely logical
//! ([`LogicalName`]). File identity is the lexically normalized absolute path;
//! the base path only affects display.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// Identity of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskName {
    File(FileName),
    Logical(LogicalName),
}

/// Key used for the content cache and timing bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKey {
    File(PathBuf),
    Logical(String),
}

impl TaskName {
    /// Classify a string: anything containing a path separator is a file,
    /// everything else is a logical name.
    pub fn parse(name: &str, base_path: Option<&Path>) -> Self {
        if name.contains(std::path::is_separator) {
            TaskName::File(FileName::new(name, base_path))
        } else {
            TaskName::Logical(LogicalName::new(name))
        }
    }

    /// The name as originally given.
    pub fn name(&self) -> &str {
        match self {
            TaskName::File(file) => file.name(),
            TaskName::Logical(logical) => logical.name(),
        }
    }

    pub fn as_file(&self) -> Option<&FileName> {
        match self {
            TaskName::File(file) => Some(file),
            TaskName::Logical(_) => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, TaskName::File(_))
    }

    pub fn key(&self) -> TaskKey {
        match self {
            TaskName::File(file) => TaskKey::File(file.path.clone()),
            TaskName::Logical(logical) => TaskKey::Logical(logical.name.clone()),
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskName::File(file) => file.fmt(f),
            TaskName::Logical(logical) => logical.fmt(f),
        }
    }
}

impl From<FileName> for TaskName {
    fn from(name: FileName) -> Self {
        TaskName::File(name)
    }
}

impl From<LogicalName> for TaskName {
    fn from(name: LogicalName) -> Self {
        TaskName::Logical(name)
    }
}

/// File-backed task name.
#[derive(Debug, Clone)]
pub struct FileName {
    name: String,
    path: PathBuf,
    base_path: Option<PathBuf>,
}

impl FileName {
    /// Resolve `name` against `base_path` (or the working directory when
    /// absent) and normalize the result.
    pub fn new(name: impl Into<String>, base_path: Option<&Path>) -> Self {
        let name = name.into();
        let base_path = base_path.map(absolute);
        let raw = Path::new(&name);
        let path = if raw.is_absolute() {
            normalize(raw)
        } else {
            let root = base_path.clone().unwrap_or_else(current_dir);
            normalize(&root.join(raw))
        };
        Self {
            name,
            path,
            base_path,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute, normalized path. This is the identity of the task.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }
}

impl PartialEq for FileName {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileName {}

impl Hash for FileName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base_path {
            Some(base) => {
                let rel = relative(base, &self.path);
                if rel.as_os_str().is_empty() {
                    f.write_str(".")
                } else {
                    write!(f, "{}", rel.display())
                }
            }
            None => write!(f, ".../{}", self.name),
        }
    }
}

/// Logical (non file-backed) task name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalName {
    name: String,
}

impl LogicalName {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

/// Make `path` absolute against the working directory and normalize it.
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&current_dir().join(path))
    }
}

/// Lexical normalization: drops `.` and folds `..` without touching the
/// file system. `..` above the root of an absolute path is discarded.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Path of `to` relative to `from`; both are expected to be normalized and
/// absolute. Returns an empty path when they are equal.
pub fn relative(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    rel
}
