// src/path_resolvers.rs

//! Mapping between source and target trees, plus path selectors.
//!
//! A [`PathResolver`] turns a path under one root (`src/**/*.ts`) into the
//! corresponding path under another root (`out/**/*.js`). A
//! [`ReversePathResolver`] builds the inverse mapping, which is what a
//! `FileMapper` needs: given a target, find its source.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::{Result, TaskchainError};
use crate::task::name::normalize;

/// Predicate deciding whether an executor acts on a given absolute path.
pub type PathFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

type ResolveFn = dyn Fn(&Path, Option<&Path>) -> Option<PathBuf> + Send + Sync;

/// Maps a path (optionally relative to a base) to another path, or `None`
/// when the path is outside the resolver's domain.
#[derive(Clone)]
pub struct PathResolver {
    inner: Arc<ResolveFn>,
}

impl fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathResolver").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolverConfig {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    /// Anchor for relative roots and relative input paths.
    pub common_root: Option<PathBuf>,
    pub source_ext: String,
    pub target_ext: String,
}

impl PathResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Path, Option<&Path>) -> Option<PathBuf> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn resolve(&self, path: &Path, base: Option<&Path>) -> Option<PathBuf> {
        (self.inner)(path, base)
    }

    /// Resolver mapping `source_root/**/<name><source_ext>` onto
    /// `target_root/**/<name><target_ext>`.
    ///
    /// Relative inputs are joined onto `base` when given, else onto
    /// `source_root`. Anything outside `source_root`, or without the source
    /// extension, resolves to `None`.
    pub fn from_config(config: PathResolverConfig) -> Self {
        let anchor = move |common: &Option<PathBuf>, path: &Path| -> PathBuf {
            match common {
                Some(root) if !path.is_absolute() => normalize(&root.join(path)),
                _ => normalize(path),
            }
        };
        let source_root = anchor(&config.common_root, &config.source_root);
        let target_root = anchor(&config.common_root, &config.target_root);

        Self::new(move |path, base| {
            let raw = path.to_string_lossy();
            if raw.is_empty() || !raw.ends_with(&config.source_ext) {
                return None;
            }

            let absolute = if path.is_absolute() {
                normalize(path)
            } else if let Some(base) = base {
                normalize(&base.join(path))
            } else {
                normalize(&source_root.join(path))
            };
            let absolute = anchor(&config.common_root, &absolute);

            let relative = absolute.strip_prefix(&source_root).ok()?;
            if relative.as_os_str().is_empty() {
                return None;
            }

            let target = target_root.join(relative).to_string_lossy().into_owned();
            let stem = target.strip_suffix(&config.source_ext)?;
            Some(PathBuf::from(format!("{stem}{}", config.target_ext)))
        })
    }
}

/// Configuration for the inverse of a [`PathResolver`]: either an explicit
/// resolver, or the forward configuration with every field present.
#[derive(Debug, Clone, Default)]
pub struct ReversePathResolverConfig {
    pub source_resolver: Option<PathResolver>,
    pub source_root: Option<PathBuf>,
    pub target_root: Option<PathBuf>,
    pub common_root: Option<PathBuf>,
    pub source_ext: Option<String>,
    pub target_ext: Option<String>,
}

pub struct ReversePathResolver;

impl ReversePathResolver {
    /// Resolver from target paths back to source paths.
    pub fn from_config(config: ReversePathResolverConfig) -> Result<PathResolver> {
        if let Some(resolver) = config.source_resolver {
            return Ok(resolver);
        }
        let missing =
            |field: &str| TaskchainError::InvalidUsage(format!("either source_resolver or {field} must be defined"));

        let target_root = config.target_root.ok_or_else(|| missing("target_root"))?;
        let source_root = config.source_root.ok_or_else(|| missing("source_root"))?;
        let target_ext = config.target_ext.ok_or_else(|| missing("target_ext"))?;
        let source_ext = config.source_ext.ok_or_else(|| missing("source_ext"))?;

        Ok(PathResolver::from_config(PathResolverConfig {
            source_root: target_root,
            target_root: source_root,
            common_root: config.common_root,
            source_ext: target_ext,
            target_ext: source_ext,
        }))
    }
}

/// Whether `path` lies strictly below `ancestor`. With `subfolders = false`
/// only direct children match.
pub fn path_matches(path: &Path, ancestor: &Path, subfolders: bool) -> bool {
    let path = normalize(path);
    let ancestor = normalize(ancestor);
    let Ok(relative) = path.strip_prefix(&ancestor) else {
        return false;
    };
    match relative.components().count() {
        0 => false,
        1 => true,
        _ => subfolders,
    }
}

/// Filter accepting paths with the given extension (`".ts"` or `"ts"`).
pub fn extension_filter(ext: &str) -> PathFilter {
    let ext = ext.trim_start_matches('.').to_string();
    Arc::new(move |path: &Path| path.extension().is_some_and(|e| e == ext.as_str()))
}

/// Filter accepting paths under `root` matching any of the glob patterns.
/// Patterns are evaluated against the path relative to `root`, with forward
/// slashes.
pub fn glob_filter(root: impl Into<PathBuf>, patterns: &[impl AsRef<str>]) -> Result<PathFilter> {
    let root = normalize(&root.into());
    let set = build_globset(patterns)?;
    Ok(Arc::new(move |path: &Path| {
        path.strip_prefix(&root)
            .map(|rel| set.is_match(rel.to_string_lossy().replace('\\', "/")))
            .unwrap_or(false)
    }))
}

fn build_globset(patterns: &[impl AsRef<str>]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let pat = pat.as_ref();
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build().context("building glob set")?)
}
