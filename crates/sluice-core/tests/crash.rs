#![allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
//! Crash tests using fork + SIGKILL.
//!
//! The parent creates a stage, forks a child that claims it and works on it,
//! then kills the child with SIGKILL mid-operation. The parent checks that
//! the surviving state tells the truth about what happened:
//! - a kill during commit leaves the failure marker and blocks new stages
//! - the interrupted apply blocks destroy until the staleness window passes
//! - a kill outside commit leaves no marker and a consistent store

use chrono::{TimeDelta, Utc};
use sluice_core::{CoreError, FixedClock, Stage, MARKER_FILE_NAME, STALENESS_WINDOW_SECS};
use sluice_engine::MockEngine;
use sluice_schema::{stage_type, ChangeSet, OwnerId, StageId};
use sluice_store::{verify_store_integrity, StoreLayout};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Site {
    _dir: tempfile::TempDir,
    layout: StoreLayout,
    target: PathBuf,
}

fn site() -> Site {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("site");
    fs::create_dir_all(target.join("core")).unwrap();
    fs::write(target.join("core/lib.php"), "<?php // 10.1").unwrap();
    let layout = StoreLayout::new(dir.path().join("state"));
    layout.initialize().unwrap();
    Site {
        _dir: dir,
        layout,
        target,
    }
}

fn stage(site: &Site, engine: Arc<MockEngine>) -> Stage {
    Stage::new(
        stage_type!("updater"),
        OwnerId::new("cron"),
        &site.layout,
        &site.target,
        engine,
    )
}

/// Fork a child that runs `child_fn`, wait until `ready` holds (or the
/// deadline passes), then SIGKILL the child and reap it.
///
/// # Safety
/// Uses `libc::fork()`. The child never returns into the test harness.
unsafe fn kill_when(child_fn: impl FnOnce(), ready: impl Fn() -> bool, deadline: Duration) {
    let pid = libc::fork();
    assert!(pid >= 0, "fork() failed");

    if pid == 0 {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(child_fn));
        libc::_exit(i32::from(outcome.is_err()));
    }

    let start = Instant::now();
    while !ready() && start.elapsed() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let ret = libc::kill(pid, libc::SIGKILL);
    assert_eq!(ret, 0, "kill() failed");
    let mut status: i32 = 0;
    let waited = libc::waitpid(pid, &raw mut status, 0);
    assert_eq!(waited, pid, "waitpid() failed");
    assert!(libc::WIFSIGNALED(status), "child exited before it was killed");
}

fn child_apply(site: &Site, id: &StageId) {
    let engine = Arc::new(MockEngine::new());
    engine.set_commit_delay(Duration::from_secs(30));
    let mut stage = stage(site, engine);
    stage.claim(id).unwrap();
    let _ = stage.apply(None);
}

fn assert_store_healthy(layout: &StoreLayout) {
    let report = verify_store_integrity(layout).unwrap();
    assert!(
        report.failed.is_empty(),
        "store integrity check found failures: {:?}",
        report.failed
    );
}

#[test]
fn kill_during_commit_leaves_marker_and_blocks_destroy() {
    let site = site();
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let mut owner = stage(&site, Arc::new(MockEngine::new())).with_clock(clock.clone());
    let id = owner.create(None).unwrap();

    let marker = site.target.join(MARKER_FILE_NAME);
    unsafe {
        kill_when(
            || child_apply(&site, &id),
            || marker.exists(),
            Duration::from_secs(10),
        );
    }
    assert!(marker.is_file(), "child never reached the commit");
    assert_store_healthy(&site.layout);

    let err = stage(&site, Arc::new(MockEngine::new()))
        .create(None)
        .unwrap_err();
    assert!(matches!(err, CoreError::CrashedState(_)));

    // The dead apply is still in progress as far as anyone can tell.
    assert!(owner.is_applying().unwrap());
    assert!(owner.apply_started_at().unwrap().is_some());
    assert!(matches!(owner.destroy(false, None), Err(CoreError::Stage(_))));

    clock.advance(TimeDelta::seconds(STALENESS_WINDOW_SECS) + TimeDelta::minutes(1));
    assert!(!owner.is_applying().unwrap());
    owner.destroy(false, None).unwrap();
    assert!(owner.is_available().unwrap());

    // The marker outlives the stage until an operator clears it.
    let mut fresh = stage(&site, Arc::new(MockEngine::new()));
    assert!(matches!(fresh.create(None), Err(CoreError::CrashedState(_))));
    owner.failure_marker().clear().unwrap();
    fresh.create(None).unwrap();
}

#[test]
fn kill_during_modify_leaves_no_marker() {
    let site = site();
    let mut owner = stage(&site, Arc::new(MockEngine::new()));
    let id = owner.create(None).unwrap();
    let stage_dir = owner.stage_directory().unwrap();
    let log = stage_dir.join(sluice_engine::mock::MOCK_LOG);

    let child_site = &site;
    let child_id = &id;
    unsafe {
        kill_when(
            move || {
                let mut stage = stage(child_site, Arc::new(MockEngine::new()));
                stage.claim(child_id).unwrap();
                let items = vec!["acme/log:^2".to_owned()];
                let change_set = ChangeSet::parse(&items, &[]).unwrap();
                loop {
                    stage.modify(&change_set, None).unwrap();
                }
            },
            || log.exists(),
            Duration::from_secs(10),
        );
    }

    assert!(!site.target.join(MARKER_FILE_NAME).exists());
    assert_store_healthy(&site.layout);
    owner.check_ownership().unwrap();
    assert!(!owner.is_applying().unwrap());
    owner.destroy(false, None).unwrap();
    assert!(!stage_dir.exists());
}
