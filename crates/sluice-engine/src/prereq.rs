use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub(crate) fn command_exists(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools the rsync engine shells out to.
/// Empty list means all prerequisites are met.
pub fn check_rsync_prereqs(package_manager: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("rsync") {
        missing.push(MissingPrereq {
            name: "rsync".to_owned(),
            purpose: "copying the target into and out of the staging area",
            install_hint:
                "zypper install rsync | apt install rsync | dnf install rsync | pacman -S rsync",
        });
    }

    if !command_exists(package_manager) {
        missing.push(MissingPrereq {
            name: package_manager.to_owned(),
            purpose: "running change operations inside the staging area",
            install_hint: "install it and make sure it is on PATH",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nThe rsync engine needs these tools on PATH.");
    msg
}
