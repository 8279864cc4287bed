use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a stage is in its lifecycle, as derived from the shared store.
///
/// `Modifying` and `Destroyed` are only held for the duration of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Unavailable,
    Created,
    Modifying,
    Applying,
    Applied,
    Destroyed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageState::Unavailable => "unavailable",
            StageState::Created => "created",
            StageState::Modifying => "modifying",
            StageState::Applying => "applying",
            StageState::Applied => "applied",
            StageState::Destroyed => "destroyed",
        })
    }
}

impl StageState {
    /// Derive the persistent state from the stored lock and apply keys.
    pub fn derive(has_lock: bool, applying: bool, changes_applied: bool) -> Self {
        match (has_lock, applying, changes_applied) {
            (false, ..) => StageState::Unavailable,
            (true, _, true) => StageState::Applied,
            (true, true, false) => StageState::Applying,
            (true, false, false) => StageState::Created,
        }
    }
}

pub fn validate_transition(from: StageState, to: StageState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (StageState::Unavailable, StageState::Created)
            | (
                StageState::Created,
                StageState::Modifying | StageState::Applying | StageState::Destroyed
            )
            | (
                StageState::Modifying,
                StageState::Created | StageState::Destroyed
            )
            | (
                StageState::Applying,
                StageState::Applied | StageState::Created | StageState::Destroyed
            )
            | (
                StageState::Applied,
                StageState::Applied | StageState::Destroyed
            )
            | (StageState::Destroyed, StageState::Unavailable)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(StageState::Unavailable, StageState::Created).is_ok());
        assert!(validate_transition(StageState::Created, StageState::Modifying).is_ok());
        assert!(validate_transition(StageState::Modifying, StageState::Created).is_ok());
        assert!(validate_transition(StageState::Created, StageState::Applying).is_ok());
        assert!(validate_transition(StageState::Applying, StageState::Applied).is_ok());
        // Precondition failure or crash clears the apply time.
        assert!(validate_transition(StageState::Applying, StageState::Created).is_ok());
        assert!(validate_transition(StageState::Applied, StageState::Applied).is_ok()); // post-apply
        assert!(validate_transition(StageState::Applied, StageState::Destroyed).is_ok());
        assert!(validate_transition(StageState::Created, StageState::Destroyed).is_ok());
        assert!(validate_transition(StageState::Destroyed, StageState::Unavailable).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(StageState::Unavailable, StageState::Applying).is_err());
        assert!(validate_transition(StageState::Unavailable, StageState::Destroyed).is_err());
        assert!(validate_transition(StageState::Applying, StageState::Applying).is_err());
        assert!(validate_transition(StageState::Applied, StageState::Modifying).is_err());
        assert!(validate_transition(StageState::Applied, StageState::Applying).is_err());
        assert!(validate_transition(StageState::Created, StageState::Applied).is_err());
        assert!(validate_transition(StageState::Destroyed, StageState::Created).is_err());
    }

    #[test]
    fn derive_from_store_flags() {
        assert_eq!(StageState::derive(false, true, true), StageState::Unavailable);
        assert_eq!(StageState::derive(true, false, false), StageState::Created);
        assert_eq!(StageState::derive(true, true, false), StageState::Applying);
        assert_eq!(StageState::derive(true, true, true), StageState::Applied);
        assert_eq!(StageState::derive(true, false, true), StageState::Applied);
    }

    #[test]
    fn invalid_transition_error_names_states() {
        let err = validate_transition(StageState::Applied, StageState::Modifying).unwrap_err();
        assert_eq!(err.to_string(), "invalid stage transition: applied -> modifying");
    }
}
