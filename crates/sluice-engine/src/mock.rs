use crate::engine::{EngineOp, Exclusions, StagingEngine};
use crate::EngineError;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// File inside the working copy that records every staged command, one per line.
pub const MOCK_LOG: &str = ".sluice-mock.log";

/// A failure to inject into the next calls of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Precondition(String),
    Failed(String),
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: EngineOp,
    pub command: Vec<String>,
    pub exclusions: Vec<PathBuf>,
}

/// In-process engine that copies with `std::fs` and never runs external tools.
///
/// `stage` appends the command line to [`MOCK_LOG`] in the working copy, so a
/// committed target shows which commands ran.
#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<MockCall>>,
    failures: Mutex<HashMap<EngineOp, MockFailure>>,
    commit_delay: Mutex<Option<Duration>>,
}

fn poisoned(op: EngineOp, e: impl std::fmt::Display) -> EngineError {
    EngineError::Failed {
        op,
        message: format!("mutex poisoned: {e}"),
    }
}

fn is_excluded(rel: &Path, exclusions: &Exclusions) -> bool {
    exclusions.iter().any(|ex| {
        let ex = ex.strip_prefix("/").unwrap_or(ex.as_path());
        rel == ex
    })
}

/// Recursively copy `from` into `to`, skipping excluded relative paths.
fn copy_tree(from: &Path, to: &Path, rel: &Path, exclusions: &Exclusions) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let rel_child = rel.join(entry.file_name());
        if is_excluded(&rel_child, exclusions) {
            continue;
        }
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &dest, &rel_child, exclusions)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call of `op` fail with `failure`.
    pub fn fail_on(&self, op: EngineOp, failure: MockFailure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op, failure);
        }
    }

    pub fn clear_failure(&self, op: EngineOp) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(&op);
        }
    }

    /// Sleep this long inside `commit` before copying anything.
    pub fn set_commit_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.commit_delay.lock() {
            *d = Some(delay);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_of(&self, op: EngineOp) -> Vec<MockCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    fn record(
        &self,
        op: EngineOp,
        command: &[String],
        exclusions: &Exclusions,
    ) -> Result<(), EngineError> {
        self.calls
            .lock()
            .map_err(|e| poisoned(op, e))?
            .push(MockCall {
                op,
                command: command.to_vec(),
                exclusions: exclusions.to_vec(),
            });

        let failure = self
            .failures
            .lock()
            .map_err(|e| poisoned(op, e))?
            .get(&op)
            .cloned();
        match failure {
            None => Ok(()),
            Some(MockFailure::Precondition(message)) => {
                Err(EngineError::Precondition { op, message })
            }
            Some(MockFailure::Failed(message)) => Err(EngineError::Failed { op, message }),
            Some(MockFailure::Timeout) => Err(EngineError::Timeout { op, secs: 0 }),
        }
    }
}

impl StagingEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn begin(
        &self,
        source: &Path,
        staging: &Path,
        exclusions: &Exclusions,
        _timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.record(EngineOp::Begin, &[], exclusions)?;
        if !source.is_dir() {
            return Err(EngineError::Precondition {
                op: EngineOp::Begin,
                message: format!("source {} is not a directory", source.display()),
            });
        }
        copy_tree(source, staging, Path::new(""), exclusions)?;
        Ok(())
    }

    fn stage(
        &self,
        command: &[String],
        _source: &Path,
        staging: &Path,
        exclusions: &Exclusions,
        _timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.record(EngineOp::Stage, command, exclusions)?;
        let mut log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(staging.join(MOCK_LOG))?;
        writeln!(log, "{}", command.join(" "))?;
        Ok(())
    }

    fn commit(
        &self,
        staging: &Path,
        target: &Path,
        exclusions: &Exclusions,
        _timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.record(EngineOp::Commit, &[], exclusions)?;
        if !target.is_dir() {
            return Err(EngineError::Precondition {
                op: EngineOp::Commit,
                message: format!("target {} is not a directory", target.display()),
            });
        }
        let delay = *self
            .commit_delay
            .lock()
            .map_err(|e| poisoned(EngineOp::Commit, e))?;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        copy_tree(staging, target, Path::new(""), exclusions).map_err(|e| EngineError::Failed {
            op: EngineOp::Commit,
            message: e.to_string(),
        })
    }
}
