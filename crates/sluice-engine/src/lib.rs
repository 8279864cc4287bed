//! Staging engines for Sluice.
//!
//! This crate implements the copy layer behind a stage: the pluggable
//! `StagingEngine` trait with its three primitives (`begin`, `stage`,
//! `commit`), an `rsync`-backed engine that runs package-manager commands
//! inside the working copy, a mock engine with failure injection for tests,
//! and prerequisite checks for the external tools involved.

pub mod engine;
pub mod mock;
pub mod prereq;
pub mod process;
pub mod rsync;

pub use engine::{select_engine, EngineOp, Exclusions, StagingEngine};
pub use mock::{MockCall, MockEngine, MockFailure};
pub use prereq::{check_rsync_prereqs, format_missing, MissingPrereq};
pub use rsync::RsyncEngine;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine '{0}' is not available on this system")]
    Unavailable(String),
    /// Nothing was touched yet; the operation can be retried safely.
    #[error("{op} precondition failed: {message}")]
    Precondition { op: EngineOp, message: String },
    #[error("{op} failed: {message}")]
    Failed { op: EngineOp, message: String },
    #[error("{op} timed out after {secs}s")]
    Timeout { op: EngineOp, secs: u64 },
}

impl EngineError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}
