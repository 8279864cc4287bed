//! Collectors for the paths that copy operations must leave alone.
//!
//! All paths are relative to the target directory.

use crate::failure_marker::MARKER_FILE_NAME;
use crate::BoxError;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("{collector}: {source}")]
pub struct ExclusionError {
    pub collector: String,
    #[source]
    pub source: BoxError,
}

pub trait ExclusionCollector: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self, target: &Path, paths: &mut BTreeSet<PathBuf>) -> Result<(), BoxError>;
}

/// Operator-configured paths, e.g. local settings files.
pub struct ConfiguredPaths {
    paths: Vec<PathBuf>,
}

impl ConfiguredPaths {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl ExclusionCollector for ConfiguredPaths {
    fn name(&self) -> &str {
        "configured paths"
    }

    fn collect(&self, _target: &Path, paths: &mut BTreeSet<PathBuf>) -> Result<(), BoxError> {
        for path in &self.paths {
            let escapes = path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(format!(
                    "'{}' must be a relative path inside the target",
                    path.display()
                )
                .into());
            }
            paths.insert(path.clone());
        }
        Ok(())
    }
}

/// The failure marker must never be copied in either direction.
pub struct FailureMarkerFile;

impl ExclusionCollector for FailureMarkerFile {
    fn name(&self) -> &str {
        "failure marker"
    }

    fn collect(&self, _target: &Path, paths: &mut BTreeSet<PathBuf>) -> Result<(), BoxError> {
        paths.insert(PathBuf::from(MARKER_FILE_NAME));
        Ok(())
    }
}

/// Version-control metadata (`.git`) anywhere under the target.
pub struct VcsDirectories;

const VCS_NAMES: &[&str] = &[".git", ".hg", ".svn"];

fn find_vcs(root: &Path, dir: &Path, found: &mut BTreeSet<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        if VCS_NAMES.iter().any(|v| name == *v) {
            // Submodules use a `.git` file rather than a directory.
            if let Ok(rel) = entry.path().strip_prefix(root) {
                found.insert(rel.to_path_buf());
            }
            continue;
        }
        if file_type.is_dir() {
            find_vcs(root, &entry.path(), found)?;
        }
    }
    Ok(())
}

impl ExclusionCollector for VcsDirectories {
    fn name(&self) -> &str {
        "version control"
    }

    fn collect(&self, target: &Path, paths: &mut BTreeSet<PathBuf>) -> Result<(), BoxError> {
        if !target.is_dir() {
            return Ok(());
        }
        find_vcs(target, target, paths)?;
        Ok(())
    }
}

/// The ordered set of collectors a stage consults before copying.
#[derive(Default)]
pub struct ExclusionSet {
    collectors: Vec<Box<dyn ExclusionCollector>>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured paths, the failure marker, and optionally VCS metadata.
    pub fn standard(configured: &[String], vcs: bool) -> Self {
        let mut set = Self::new()
            .with(ConfiguredPaths::new(configured.iter().map(PathBuf::from)))
            .with(FailureMarkerFile);
        if vcs {
            set = set.with(VcsDirectories);
        }
        set
    }

    #[must_use]
    pub fn with(mut self, collector: impl ExclusionCollector + 'static) -> Self {
        self.collectors.push(Box::new(collector));
        self
    }

    pub fn collect(&self, target: &Path) -> Result<Vec<PathBuf>, ExclusionError> {
        let mut paths = BTreeSet::new();
        for collector in &self.collectors {
            collector
                .collect(target, &mut paths)
                .map_err(|source| ExclusionError {
                    collector: collector.name().to_owned(),
                    source,
                })?;
        }
        debug!("collected {} excluded paths", paths.len());
        Ok(paths.into_iter().collect())
    }
}
