//! Built-in validators every stage runs.

use crate::event::LifecycleEvent;
use crate::pipeline::Validator;
use crate::BoxError;
use sluice_schema::Phase;
use std::path::{Path, PathBuf};

const PRIORITY: i32 = 100;

/// Canonical form where the path exists, otherwise the path as given.
fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// The target must be an existing directory.
pub struct TargetDirectoryValidator;

impl Validator for TargetDirectoryValidator {
    fn name(&self) -> &str {
        "target directory"
    }

    fn subscribed_phases(&self) -> Vec<(Phase, i32)> {
        vec![
            (Phase::PreCreate, PRIORITY),
            (Phase::PreApply, PRIORITY),
            (Phase::StatusCheck, PRIORITY),
        ]
    }

    fn handle(&self, event: &mut LifecycleEvent<'_>) -> Result<(), BoxError> {
        let target = event.stage().target();
        if !target.is_dir() {
            event.add_error(
                vec![format!(
                    "The target directory {} does not exist or is not a directory.",
                    target.display()
                )],
                None,
            )?;
        }
        Ok(())
    }
}

/// Working copies must not live inside the tree they are copied from.
pub struct StagingRootValidator;

impl Validator for StagingRootValidator {
    fn name(&self) -> &str {
        "staging root"
    }

    fn subscribed_phases(&self) -> Vec<(Phase, i32)> {
        vec![(Phase::PreCreate, PRIORITY), (Phase::StatusCheck, PRIORITY)]
    }

    fn handle(&self, event: &mut LifecycleEvent<'_>) -> Result<(), BoxError> {
        let stage = event.stage();
        let root = resolve(&stage.staging_root()?);
        let target = resolve(stage.target());
        if root.starts_with(&target) {
            event.add_error(
                vec![format!(
                    "The staging root {} is inside the target directory {}.",
                    root.display(),
                    target.display()
                )],
                None,
            )?;
        }
        Ok(())
    }
}
