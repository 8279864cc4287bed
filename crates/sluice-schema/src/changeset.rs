//! Package requirements and the change sets a stage applies to its staging copy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequirementError {
    #[error("invalid package name '{0}' (expected vendor/package in lowercase)")]
    InvalidName(String),
    #[error("empty version constraint for '{0}'")]
    EmptyConstraint(String),
}

/// A package requirement in `vendor/package[:constraint]` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl Requirement {
    pub fn parse(input: &str) -> Result<Self, RequirementError> {
        let input = input.trim();
        let (name, constraint) = match input.split_once(':') {
            Some((n, c)) => {
                let c = c.trim();
                if c.is_empty() {
                    return Err(RequirementError::EmptyConstraint(n.to_owned()));
                }
                (n.trim(), Some(c.to_owned()))
            }
            None => (input, None),
        };
        validate_package_name(name)?;
        Ok(Self {
            name: name.to_owned(),
            constraint,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{}:{c}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl std::str::FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check a `vendor/package` name: two lowercase segments of `[a-z0-9]` joined
/// by single `_`, `.` or `-` separators (a double `--` is allowed in the package
/// segment).
pub fn validate_package_name(name: &str) -> Result<(), RequirementError> {
    let invalid = || RequirementError::InvalidName(name.to_owned());
    let (vendor, package) = name.split_once('/').ok_or_else(invalid)?;
    if !valid_segment(vendor, false) || !valid_segment(package, true) {
        return Err(invalid());
    }
    Ok(())
}

fn valid_segment(segment: &str, allow_double_dash: bool) -> bool {
    let bytes = segment.as_bytes();
    let is_word = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if is_word(first) && is_word(last) => {}
        _ => return false,
    }
    let mut run = 0usize;
    let mut prev_sep = 0u8;
    for &b in bytes {
        if is_word(b) {
            run = 0;
        } else if matches!(b, b'_' | b'.' | b'-') {
            run += 1;
            let double_dash = allow_double_dash && run == 2 && b == b'-' && prev_sep == b'-';
            if run > 1 && !double_dash {
                return false;
            }
            prev_sep = b;
        } else {
            return false;
        }
    }
    true
}

/// Runtime and dev requirements to stage in one `modify` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub runtime: Vec<Requirement>,
    #[serde(default)]
    pub dev: Vec<Requirement>,
}

impl ChangeSet {
    pub fn new(runtime: Vec<Requirement>, dev: Vec<Requirement>) -> Self {
        Self { runtime, dev }
    }

    /// Parse raw `vendor/package[:constraint]` strings.
    pub fn parse(runtime: &[String], dev: &[String]) -> Result<Self, RequirementError> {
        let parse_all = |items: &[String]| -> Result<Vec<Requirement>, RequirementError> {
            items.iter().map(|s| Requirement::parse(s)).collect()
        };
        Ok(Self {
            runtime: parse_all(runtime)?,
            dev: parse_all(dev)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.runtime.is_empty() && self.dev.is_empty()
    }

    /// Re-check every requirement, for change sets built directly from structs.
    pub fn validate(&self) -> Result<(), RequirementError> {
        for req in self.runtime.iter().chain(&self.dev) {
            validate_package_name(&req.name)?;
            if req.constraint.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(RequirementError::EmptyConstraint(req.name.clone()));
            }
        }
        Ok(())
    }

    /// The package-manager commands that realize this change set, in order:
    /// constraint changes without installing, then one update of every
    /// touched package.
    pub fn commands(&self) -> Vec<Vec<String>> {
        let render = |reqs: &[Requirement]| reqs.iter().map(ToString::to_string).collect::<Vec<_>>();
        let mut commands = Vec::new();
        if !self.runtime.is_empty() {
            let mut cmd = vec!["require".to_owned(), "--no-update".to_owned()];
            cmd.extend(render(&self.runtime));
            commands.push(cmd);
        }
        if !self.dev.is_empty() {
            let mut cmd = vec![
                "require".to_owned(),
                "--dev".to_owned(),
                "--no-update".to_owned(),
            ];
            cmd.extend(render(&self.dev));
            commands.push(cmd);
        }
        if !self.is_empty() {
            let mut cmd = vec![
                "update".to_owned(),
                "--with-all-dependencies".to_owned(),
                "--optimize-autoloader".to_owned(),
            ];
            cmd.extend(render(&self.runtime));
            cmd.extend(render(&self.dev));
            commands.push(cmd);
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_and_constraint() {
        let r = Requirement::parse("acme/http-client:^2.1").unwrap();
        assert_eq!(r.name, "acme/http-client");
        assert_eq!(r.constraint.as_deref(), Some("^2.1"));
        assert_eq!(r.to_string(), "acme/http-client:^2.1");
    }

    #[test]
    fn parse_bare_name() {
        let r: Requirement = "acme/log".parse().unwrap();
        assert_eq!(r.constraint, None);
    }

    #[test]
    fn rejects_invalid_names() {
        for bad in [
            "nopackage",
            "Acme/log",
            "acme/",
            "/log",
            "acme/log-",
            "acme/lo..g",
            "acme/a/b",
            "acme/lo g",
        ] {
            assert!(Requirement::parse(bad).is_err(), "{bad} must be rejected");
        }
    }

    #[test]
    fn accepts_separators() {
        for good in ["acme/log_util", "acme.io/log", "acme/log--bridge", "a1/b2"] {
            assert!(Requirement::parse(good).is_ok(), "{good} must be accepted");
        }
        assert!(Requirement::parse("ac--me/log").is_err());
    }

    #[test]
    fn rejects_empty_constraint() {
        assert_eq!(
            Requirement::parse("acme/log:"),
            Err(RequirementError::EmptyConstraint("acme/log".to_owned()))
        );
    }

    #[test]
    fn commands_for_runtime_and_dev() {
        let cs = ChangeSet::parse(&["acme/log:^1".to_owned()], &["acme/test".to_owned()]).unwrap();
        let cmds = cs.commands();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], ["require", "--no-update", "acme/log:^1"]);
        assert_eq!(cmds[1], ["require", "--dev", "--no-update", "acme/test"]);
        assert_eq!(
            cmds[2],
            [
                "update",
                "--with-all-dependencies",
                "--optimize-autoloader",
                "acme/log:^1",
                "acme/test"
            ]
        );
    }

    #[test]
    fn empty_changeset_has_no_commands() {
        assert!(ChangeSet::default().commands().is_empty());
    }

    #[test]
    fn validate_catches_struct_built_requirements() {
        let cs = ChangeSet::new(
            vec![Requirement {
                name: "BAD".to_owned(),
                constraint: None,
            }],
            Vec::new(),
        );
        assert!(cs.validate().is_err());
    }
}
