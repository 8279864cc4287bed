use serde::{Deserialize, Serialize};
use std::fmt;

/// A named point in the stage lifecycle at which validators are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PreCreate,
    PostCreate,
    PreModify,
    PostModify,
    PreApply,
    PostApply,
    PreDestroy,
    PostDestroy,
    /// Read-only check that never mutates the stage.
    StatusCheck,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::PreCreate,
        Phase::PostCreate,
        Phase::PreModify,
        Phase::PostModify,
        Phase::PreApply,
        Phase::PostApply,
        Phase::PreDestroy,
        Phase::PostDestroy,
        Phase::StatusCheck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PreCreate => "pre-create",
            Phase::PostCreate => "post-create",
            Phase::PreModify => "pre-modify",
            Phase::PostModify => "post-modify",
            Phase::PreApply => "pre-apply",
            Phase::PostApply => "post-apply",
            Phase::PreDestroy => "pre-destroy",
            Phase::PostDestroy => "post-destroy",
            Phase::StatusCheck => "status-check",
        }
    }

    /// Phases dispatched before the operation they guard; results abort it.
    pub fn is_pre_operation(self) -> bool {
        matches!(
            self,
            Phase::PreCreate | Phase::PreModify | Phase::PreApply | Phase::PreDestroy
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown lifecycle phase '{s}'"))
    }
}
