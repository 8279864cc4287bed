use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Paths relative to the copied root that an engine must neither read nor write.
pub type Exclusions = [PathBuf];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineOp {
    Begin,
    Stage,
    Commit,
}

impl fmt::Display for EngineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin",
            Self::Stage => "stage",
            Self::Commit => "commit",
        })
    }
}

/// The three copy primitives a stage delegates to.
///
/// Every call is synchronous and bounded by `timeout` (`None` waits forever).
/// Engines never retry; a failure or timeout is reported as-is.
pub trait StagingEngine: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Materialize `staging` as a working copy of `source`.
    fn begin(
        &self,
        source: &Path,
        staging: &Path,
        exclusions: &Exclusions,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError>;

    /// Run one change operation inside `staging`.
    fn stage(
        &self,
        command: &[String],
        source: &Path,
        staging: &Path,
        exclusions: &Exclusions,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError>;

    /// Copy `staging` over `target`.
    ///
    /// Must return [`EngineError::Precondition`] when nothing has been copied
    /// yet, and any other kind once copying may have started.
    fn commit(
        &self,
        staging: &Path,
        target: &Path,
        exclusions: &Exclusions,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError>;
}

pub fn select_engine(
    name: &str,
    package_manager: &str,
) -> Result<Arc<dyn StagingEngine>, EngineError> {
    match name {
        "rsync" => Ok(Arc::new(
            crate::rsync::RsyncEngine::new().with_package_manager(package_manager),
        )),
        "mock" => Ok(Arc::new(crate::mock::MockEngine::new())),
        other => Err(EngineError::Unavailable(other.to_owned())),
    }
}
