//! The signal object handed to every validator during dispatch.

use crate::stage::Stage;
use sluice_schema::{ChangeSet, Phase, ResultError, ValidationResult};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

/// Misuse of the event API by a validator. Never converted into a result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("propagation of the {phase} event was stopped without first adding an error")]
    StoppedWithoutError { phase: Phase },
    #[error(transparent)]
    InvalidResult(#[from] ResultError),
}

/// One dispatch of one lifecycle phase.
///
/// Carries a read-only view of the stage, the paths the pending file
/// operation will exclude (validators may add to them), and the results
/// accumulated so far.
pub struct LifecycleEvent<'a> {
    phase: Phase,
    stage: &'a Stage,
    change_set: Option<&'a ChangeSet>,
    excluded_paths: BTreeSet<PathBuf>,
    results: Vec<ValidationResult>,
    propagation_stopped: bool,
    misuse: Option<EventError>,
}

impl<'a> LifecycleEvent<'a> {
    pub fn new(phase: Phase, stage: &'a Stage) -> Self {
        Self {
            phase,
            stage,
            change_set: None,
            excluded_paths: BTreeSet::new(),
            results: Vec::new(),
            propagation_stopped: false,
            misuse: None,
        }
    }

    #[must_use]
    pub fn with_excluded_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.excluded_paths.extend(paths);
        self
    }

    #[must_use]
    pub fn with_change_set(mut self, change_set: &'a ChangeSet) -> Self {
        self.change_set = Some(change_set);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stage(&self) -> &'a Stage {
        self.stage
    }

    /// The change set being staged, for modify events.
    pub fn change_set(&self) -> Option<&'a ChangeSet> {
        self.change_set
    }

    pub fn excluded_paths(&self) -> &BTreeSet<PathBuf> {
        &self.excluded_paths
    }

    pub fn exclude(&mut self, path: impl Into<PathBuf>) {
        self.excluded_paths.insert(path.into());
    }

    pub fn into_excluded_paths(self) -> Vec<PathBuf> {
        self.excluded_paths.into_iter().collect()
    }

    pub fn add_error(
        &mut self,
        messages: Vec<String>,
        summary: Option<String>,
    ) -> Result<(), EventError> {
        let result = ValidationResult::error(messages, summary)?;
        self.results.push(result);
        Ok(())
    }

    pub fn add_warning(
        &mut self,
        messages: Vec<String>,
        summary: Option<String>,
    ) -> Result<(), EventError> {
        let result = ValidationResult::warning(messages, summary)?;
        self.results.push(result);
        Ok(())
    }

    pub fn add_result(&mut self, result: ValidationResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ValidationResult> {
        self.results
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(ValidationResult::is_error)
    }

    /// Halt dispatch to the remaining validators of this phase.
    ///
    /// Only allowed once an error has been added; otherwise a validator could
    /// silently suppress the operation. The misuse is also remembered on the
    /// event, so ignoring the returned error does not hide it.
    pub fn stop_propagation(&mut self) -> Result<(), EventError> {
        if !self.has_errors() {
            let err = EventError::StoppedWithoutError { phase: self.phase };
            self.misuse = Some(err.clone());
            return Err(err);
        }
        self.propagation_stopped = true;
        Ok(())
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    pub(crate) fn take_misuse(&mut self) -> Option<EventError> {
        self.misuse.take()
    }
}
