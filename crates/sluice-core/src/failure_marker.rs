use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_schema::{StageType, TypeTag};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Sentinel file written into the target root for the duration of a commit.
pub const MARKER_FILE_NAME: &str = "SLUICE_FAILURE.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkerRecord {
    pub stage_type: TypeTag,
    /// Where the code that drove the stage lives.
    pub implementation: String,
    pub message: String,
    /// Set once a commit has actually failed; absent while it is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub written_at: DateTime<Utc>,
}

impl MarkerRecord {
    /// Operator-facing description of the interrupted apply.
    pub fn describe(&self) -> String {
        let mut out = self.message.clone();
        if let Some(cause) = &self.cause {
            out.push_str(&format!(" Caused by: {cause}"));
        }
        out.push_str(&format!(
            " (stage type '{}', {}, started {})",
            self.stage_type,
            self.implementation,
            self.written_at.to_rfc3339()
        ));
        out
    }
}

/// The crash sentinel for one target directory.
///
/// Lives in the target rather than the store so it survives the loss of the
/// stage's own state. While present, no stage can be created or claimed.
#[derive(Debug, Clone)]
pub struct FailureMarker {
    target: PathBuf,
}

impl FailureMarker {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.target.join(MARKER_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn read(&self) -> Result<Option<MarkerRecord>, CoreError> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn write(
        &self,
        stage_type: &StageType,
        cause: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let record = MarkerRecord {
            stage_type: stage_type.tag.clone(),
            implementation: stage_type.implementation.clone(),
            message: stage_type.failure_message.clone(),
            cause: cause.map(str::to_owned),
            written_at: at,
        };
        let content = serde_json::to_string_pretty(&record)?;
        let mut tmp = NamedTempFile::new_in(&self.target)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path()).map_err(|e| CoreError::Io(e.error))?;
        fs::File::open(&self.target)?.sync_all()?;
        info!("failure marker written at {}", self.path().display());
        Ok(())
    }

    /// Remove the marker. An explicit operator action once the target has been
    /// checked or restored.
    pub fn clear(&self) -> Result<(), CoreError> {
        let path = self.path();
        if path.exists() {
            fs::remove_file(&path)?;
            info!("failure marker cleared at {}", path.display());
        }
        Ok(())
    }

    /// Fail with [`CoreError::CrashedState`] if a marker is present.
    ///
    /// An unreadable marker counts as present.
    pub fn assert_not_exists(&self) -> Result<(), CoreError> {
        match self.read() {
            Ok(None) => Ok(()),
            Ok(Some(record)) => Err(CoreError::CrashedState(record.describe())),
            Err(e) => {
                warn!("unreadable failure marker at {}: {e}", self.path().display());
                Err(CoreError::CrashedState(format!(
                    "A failure marker exists at {} but could not be read ({e}). \
                     The target directory may be in an indeterminate state.",
                    self.path().display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_type() -> StageType {
        StageType::new("updater", "sluice_core::tests (tests.rs)")
            .with_failure_message("Automatic updates failed. Restore from backup.")
    }

    #[test]
    fn absent_marker_passes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FailureMarker::new(dir.path());
        assert!(!marker.exists());
        marker.assert_not_exists().unwrap();
        assert!(marker.read().unwrap().is_none());
    }

    #[test]
    fn written_marker_blocks_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FailureMarker::new(dir.path());
        marker.write(&stage_type(), None, Utc::now()).unwrap();
        assert!(dir.path().join(MARKER_FILE_NAME).is_file());

        let err = marker.assert_not_exists().unwrap_err();
        assert!(err.is_crashed());
        let msg = err.to_string();
        assert!(msg.starts_with("Automatic updates failed. Restore from backup."));
        assert!(msg.contains("'updater'"));
        assert!(!msg.contains("Caused by"));
    }

    #[test]
    fn rewritten_marker_carries_cause() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FailureMarker::new(dir.path());
        marker.write(&stage_type(), None, Utc::now()).unwrap();
        marker
            .write(&stage_type(), Some("commit failed: disk full"), Utc::now())
            .unwrap();
        let record = marker.read().unwrap().unwrap();
        assert_eq!(record.cause.as_deref(), Some("commit failed: disk full"));
        assert!(record.describe().contains("Caused by: commit failed: disk full"));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FailureMarker::new(dir.path());
        marker.write(&stage_type(), None, Utc::now()).unwrap();
        marker.clear().unwrap();
        marker.clear().unwrap();
        marker.assert_not_exists().unwrap();
    }

    #[test]
    fn garbage_marker_still_blocks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MARKER_FILE_NAME), "{ truncated").unwrap();
        let err = FailureMarker::new(dir.path())
            .assert_not_exists()
            .unwrap_err();
        assert!(matches!(err, CoreError::CrashedState(ref m) if m.contains("could not be read")));
    }
}
