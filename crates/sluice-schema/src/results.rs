//! Validation results produced by validators and carried by stage errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResultError {
    #[error("a validation result must have at least one message")]
    NoMessages,
    #[error("a validation result with {0} messages must have a summary")]
    MissingSummary(usize),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Aggregate severity of a list of results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Ok => write!(f, "ok"),
            OverallStatus::Warning => write!(f, "warning"),
            OverallStatus::Error => write!(f, "error"),
        }
    }
}

/// An immutable severity + messages + optional summary.
///
/// Equality is structural: severity, summary text, and the ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ValidationResult {
    severity: Severity,
    messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

impl ValidationResult {
    pub fn new(
        severity: Severity,
        messages: Vec<String>,
        summary: Option<String>,
    ) -> Result<Self, ResultError> {
        if messages.is_empty() {
            return Err(ResultError::NoMessages);
        }
        if messages.len() > 1 && summary.is_none() {
            return Err(ResultError::MissingSummary(messages.len()));
        }
        Ok(Self {
            severity,
            messages,
            summary,
        })
    }

    pub fn error(messages: Vec<String>, summary: Option<String>) -> Result<Self, ResultError> {
        Self::new(Severity::Error, messages, summary)
    }

    pub fn warning(messages: Vec<String>, summary: Option<String>) -> Result<Self, ResultError> {
        Self::new(Severity::Warning, messages, summary)
    }

    /// A single-message error. Never fails: one message needs no summary.
    pub fn single_error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            messages: vec![message.into()],
            summary: None,
        }
    }

    /// A single-message error built from a failure, with an explanatory summary.
    pub fn from_failure(error: &dyn std::error::Error, summary: Option<String>) -> Self {
        Self {
            severity: Severity::Error,
            messages: vec![error.to_string()],
            summary,
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.summary, self.messages.as_slice()) {
            (None, [only]) => write!(f, "{}: {only}", self.severity),
            (summary, messages) => {
                match summary {
                    Some(s) => write!(f, "{}: {s}", self.severity)?,
                    None => write!(f, "{}:", self.severity)?,
                }
                for m in messages {
                    write!(f, "\n  - {m}")?;
                }
                Ok(())
            }
        }
    }
}

/// Error if any result is an error, warning if the list is non-empty, ok otherwise.
pub fn overall_status(results: &[ValidationResult]) -> OverallStatus {
    if results.iter().any(ValidationResult::is_error) {
        OverallStatus::Error
    } else if results.is_empty() {
        OverallStatus::Ok
    } else {
        OverallStatus::Warning
    }
}
