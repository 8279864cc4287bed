use crate::{EngineError, EngineOp};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty stderr line, falling back to the exit status.
    pub fn failure_summary(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map_or_else(|| self.status.to_string(), |l| l.trim().to_owned())
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_output(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `cmd` to completion, killing it once `timeout` has elapsed.
///
/// A program that cannot be started never touched anything, so every spawn
/// error is a [`EngineError::Precondition`]. Output is drained on background threads so a chatty child cannot block
/// on a full pipe while the timeout loop polls it.
pub fn run(
    cmd: &mut Command,
    op: EngineOp,
    timeout: Option<Duration>,
) -> Result<CommandOutput, EngineError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("{op}: spawning {cmd:?}");

    let mut child = cmd.spawn().map_err(|e| EngineError::Precondition {
        op,
        message: format!("could not start {:?}: {e}", cmd.get_program()),
    })?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let start = Instant::now();

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(limit) = timeout {
            if start.elapsed() >= limit {
                warn!("{op}: killing child after {}s", limit.as_secs());
                kill(&mut child);
                // Grandchildren may still hold the pipes; leave the readers detached.
                drop((stdout, stderr));
                return Err(EngineError::Timeout {
                    op,
                    secs: limit.as_secs(),
                });
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(CommandOutput {
        status,
        stdout: join_output(stdout),
        stderr: join_output(stderr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_status() {
        let out = run(
            Command::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]),
            EngineOp::Stage,
            None,
        )
        .unwrap();
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.failure_summary(), "err");
    }

    #[test]
    fn timeout_kills_child() {
        let start = Instant::now();
        let err = run(
            Command::new("sh").args(["-c", "exec sleep 30"]),
            EngineOp::Commit,
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Timeout {
                op: EngineOp::Commit,
                ..
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_precondition() {
        let err = run(
            &mut Command::new("sluice-definitely-not-a-program"),
            EngineOp::Begin,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Precondition {
                op: EngineOp::Begin,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unexecutable_program_is_precondition() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("not-executable");
        std::fs::write(&program, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = run(&mut Command::new(&program), EngineOp::Commit, None).unwrap_err();
        assert!(err.is_precondition(), "{err}");
    }

    #[test]
    fn failure_summary_falls_back_to_status() {
        let out = run(
            Command::new("sh").args(["-c", "exit 1"]),
            EngineOp::Stage,
            None,
        )
        .unwrap();
        assert!(out.failure_summary().contains('1'));
    }
}
