//! Persistent state for Sluice.
//!
//! This crate provides the storage layer: `StoreLayout` for directory structure
//! management, `SharedStore` for owner-scoped key-value collections with
//! checksummed atomic writes, `StoreLock` for cross-process mutual exclusion,
//! and `verify_store_integrity` for offline checks.

pub mod integrity;
pub mod layout;
pub mod lock;
pub mod shared;

pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::StoreLock;
pub use shared::{validate_key, SharedRecord, SharedStore};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
///
/// POSIX does not guarantee rename durability without it.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for record '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}
