//! Stage lifecycle orchestration for Sluice.
//!
//! This crate ties the store, the staging engines, and the schema types into
//! the `Stage`: the owner-scoped state machine that creates a working copy,
//! modifies it, applies it over the live target, and destroys it. Around it
//! sit the `ValidatorPipeline` that lets pluggable validators veto each
//! phase, the `FailureMarker` that records an interrupted apply, exclusion
//! collectors, and the read-only status check.

pub mod clock;
pub mod event;
pub mod exclusions;
pub mod failure_marker;
pub mod lifecycle;
pub mod lock;
pub mod pipeline;
pub mod stage;
pub mod status;
pub mod validators;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use event::{EventError, LifecycleEvent};
pub use exclusions::{
    ConfiguredPaths, ExclusionCollector, ExclusionError, ExclusionSet, FailureMarkerFile,
    VcsDirectories,
};
pub use failure_marker::{FailureMarker, MarkerRecord, MARKER_FILE_NAME};
pub use lifecycle::{validate_transition, StageState};
pub use lock::{OwnershipLock, StageLock};
pub use pipeline::{FnValidator, Validator, ValidatorPipeline};
pub use stage::{CleanupOutcome, Stage, StageInfo, STALENESS_WINDOW_SECS, STAGE_COLLECTION};
pub use status::status_check;
pub use validators::{StagingRootValidator, TargetDirectoryValidator};

use sluice_schema::{Phase, ValidationResult};
use thiserror::Error;

/// Error type returned by validator handlers and exclusion collectors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn render_results(phase: &Phase, results: &[ValidationResult]) -> String {
    let mut out = format!("{phase} validation failed");
    for r in results {
        out.push('\n');
        out.push_str(&r.to_string());
    }
    out
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Cannot create a new stage because one already exists.")]
    AlreadyExists,
    /// A failure marker is present; the target may be half-written.
    #[error("{0}")]
    CrashedState(String),
    #[error("{0}")]
    NotCreated(String),
    #[error("{0}")]
    NotOwner(String),
    #[error("{0}")]
    LockMismatch(String),
    #[error("Stage must be claimed before performing any operations on it.")]
    NotClaimed,
    #[error("{}", render_results(.phase, .results))]
    Validation {
        phase: Phase,
        results: Vec<ValidationResult>,
    },
    #[error("{0}")]
    Stage(String),
    /// The commit failed after copying may have started. Restore from backup.
    #[error("{message}")]
    ApplyFailed { message: String },
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: StageState, to: StageState },
    #[error("validator misuse: {0}")]
    Event(#[from] EventError),
    #[error("store error: {0}")]
    Store(#[from] sluice_store::StoreError),
    #[error("config error: {0}")]
    Config(#[from] sluice_schema::ConfigError),
    #[error("{0}")]
    Requirement(#[from] sluice_schema::RequirementError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// The target directory may be in an indeterminate state.
    pub fn is_crashed(&self) -> bool {
        matches!(self, Self::CrashedState(_) | Self::ApplyFailed { .. })
    }

    /// Validation results carried by this error, empty for other kinds.
    pub fn results(&self) -> &[ValidationResult] {
        match self {
            Self::Validation { results, .. } => results,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_renders_every_result() {
        let err = CoreError::Validation {
            phase: Phase::PreApply,
            results: vec![
                ValidationResult::single_error("disk full"),
                ValidationResult::warning(
                    vec!["a".to_owned(), "b".to_owned()],
                    Some("Symlinks found".to_owned()),
                )
                .unwrap(),
            ],
        };
        assert!(err.is_validation());
        assert!(!err.is_crashed());
        assert_eq!(err.results().len(), 2);
        assert_eq!(
            err.to_string(),
            "pre-apply validation failed\nerror: disk full\nwarning: Symlinks found\n  - a\n  - b"
        );
    }

    #[test]
    fn crashed_kinds() {
        assert!(CoreError::CrashedState("x".to_owned()).is_crashed());
        assert!(CoreError::ApplyFailed {
            message: "x".to_owned()
        }
        .is_crashed());
        assert!(!CoreError::Stage("x".to_owned()).is_crashed());
        assert!(CoreError::Stage("x".to_owned()).results().is_empty());
    }
}
