//! Engine that copies trees with `rsync` and runs change commands through a
//! package manager inside the working copy.

use crate::engine::{EngineOp, Exclusions, StagingEngine};
use crate::prereq::command_exists;
use crate::process::{self, CommandOutput};
use crate::EngineError;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_PACKAGE_MANAGER: &str = "composer";

pub struct RsyncEngine {
    rsync: String,
    package_manager: String,
}

impl Default for RsyncEngine {
    fn default() -> Self {
        Self {
            rsync: "rsync".to_owned(),
            package_manager: DEFAULT_PACKAGE_MANAGER.to_owned(),
        }
    }
}

/// `dir/` so rsync copies the contents rather than the directory itself.
fn with_trailing_slash(dir: &Path) -> OsString {
    let mut s = dir.as_os_str().to_owned();
    if !s.to_string_lossy().ends_with('/') {
        s.push("/");
    }
    s
}

fn require_dir(op: EngineOp, what: &str, dir: &Path) -> Result<(), EngineError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(EngineError::Precondition {
            op,
            message: format!("{what} {} is not a directory", dir.display()),
        })
    }
}

fn check_status(op: EngineOp, output: &CommandOutput) -> Result<(), EngineError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(EngineError::Failed {
            op,
            message: output.failure_summary(),
        })
    }
}

impl RsyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_package_manager(mut self, program: &str) -> Self {
        program.clone_into(&mut self.package_manager);
        self
    }

    #[must_use]
    pub fn with_rsync(mut self, program: &str) -> Self {
        program.clone_into(&mut self.rsync);
        self
    }

    pub fn package_manager(&self) -> &str {
        &self.package_manager
    }

    /// Arguments shared by every copy: archive mode, mirror deletions, and one
    /// root-anchored exclude per path. Excluded paths are also protected from
    /// deletion on the receiving side.
    pub fn rsync_args(exclusions: &Exclusions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--archive".into(), "--delete".into()];
        for path in exclusions {
            let rel = path.to_string_lossy();
            let rel = rel.trim_start_matches('/');
            args.push(format!("--exclude=/{rel}").into());
        }
        args
    }

    fn sync(
        &self,
        op: EngineOp,
        from: &Path,
        to: &Path,
        exclusions: &Exclusions,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        let mut cmd = Command::new(&self.rsync);
        cmd.args(Self::rsync_args(exclusions))
            .arg(with_trailing_slash(from))
            .arg(with_trailing_slash(to));
        let output = process::run(&mut cmd, op, timeout)?;
        check_status(op, &output)
    }
}

impl StagingEngine for RsyncEngine {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn available(&self) -> bool {
        command_exists(&self.rsync)
    }

    fn begin(
        &self,
        source: &Path,
        staging: &Path,
        exclusions: &Exclusions,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        require_dir(EngineOp::Begin, "source", source)?;
        std::fs::create_dir_all(staging)?;
        info!(
            "copying {} into staging area {}",
            source.display(),
            staging.display()
        );
        self.sync(EngineOp::Begin, source, staging, exclusions, timeout)
    }

    fn stage(
        &self,
        command: &[String],
        _source: &Path,
        staging: &Path,
        _exclusions: &Exclusions,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        require_dir(EngineOp::Stage, "staging area", staging)?;
        if command.is_empty() {
            return Err(EngineError::Precondition {
                op: EngineOp::Stage,
                message: "empty command".to_owned(),
            });
        }
        debug!("{} {}", self.package_manager, command.join(" "));
        let mut cmd = Command::new(&self.package_manager);
        cmd.args(command).current_dir(staging);
        let output = process::run(&mut cmd, EngineOp::Stage, timeout)?;
        check_status(EngineOp::Stage, &output)
    }

    fn commit(
        &self,
        staging: &Path,
        target: &Path,
        exclusions: &Exclusions,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        require_dir(EngineOp::Commit, "staging area", staging)?;
        require_dir(EngineOp::Commit, "target", target)?;
        info!(
            "copying staging area {} over {}",
            staging.display(),
            target.display()
        );
        self.sync(EngineOp::Commit, staging, target, exclusions, timeout)
    }
}
