//! The stage: an owner-scoped working copy of a target directory.
//!
//! Every piece of stage state lives in the shared store, never in the
//! process, because the process that creates a stage is usually not the one
//! that applies or destroys it. The only in-memory state is the claimed lock,
//! and it is re-checked against the store on every mutating call.

use crate::clock::{Clock, SystemClock};
use crate::event::LifecycleEvent;
use crate::exclusions::{ExclusionSet, FailureMarkerFile};
use crate::failure_marker::{FailureMarker, MarkerRecord, MARKER_FILE_NAME};
use crate::lifecycle::{validate_transition, StageState};
use crate::lock::{OwnershipLock, StageLock};
use crate::pipeline::ValidatorPipeline;
use crate::CoreError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sluice_engine::StagingEngine;
use sluice_schema::{ChangeSet, OwnerId, Phase, SluiceConfig, StageId, StageType, TypeTag};
use sluice_store::{validate_key, SharedStore, StoreLayout};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared-store collection holding all stage state.
pub const STAGE_COLLECTION: &str = "stage";

/// An apply older than this is presumed abandoned.
pub const STALENESS_WINDOW_SECS: i64 = 3600;

const METADATA_KEY: &str = "metadata";
const STAGING_ROOT_KEY: &str = "staging_root";
const APPLY_TIME_KEY: &str = "apply_started_at";
const CHANGES_APPLIED_KEY: &str = "changes_applied";
const DESTROYED_PREFIX: &str = "destroyed.";

/// How long the reason a stage was destroyed stays readable to its owner.
pub const DESTROY_NOTE_RETENTION_SECS: i64 = 7 * 24 * 3600;

const MSG_NOT_CREATED: &str = "Cannot claim the stage because no stage has been created.";
const MSG_NOT_OWNER: &str =
    "Cannot claim the stage because it is not owned by the current user or session.";
const MSG_LOCK_MISMATCH: &str =
    "Cannot claim the stage because the current lock does not match the stored lock.";
const MSG_OWNERSHIP_LOST: &str = "Stage is not owned by the current user or session.";

/// What happened to the staging directory during `destroy`.
///
/// Removal failures do not fail the destroy; releasing the lock matters more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Removed { path: PathBuf },
    NotPresent { path: PathBuf },
    Failed { path: PathBuf, error: String },
}

fn remove_tree(path: &Path) -> CleanupOutcome {
    if path.symlink_metadata().is_err() {
        return CleanupOutcome::NotPresent {
            path: path.to_path_buf(),
        };
    }
    match fs::remove_dir_all(path) {
        Ok(()) => CleanupOutcome::Removed {
            path: path.to_path_buf(),
        },
        Err(e) => {
            warn!("failed to remove staging directory {}: {e}", path.display());
            CleanupOutcome::Failed {
                path: path.to_path_buf(),
                error: e.to_string(),
            }
        }
    }
}

/// Why a stage went away, kept for owners still holding its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DestroyNote {
    message: String,
    destroyed_at: DateTime<Utc>,
}

/// Read-only snapshot of the stored stage state.
#[derive(Debug, Clone, Serialize)]
pub struct StageInfo {
    pub state: StageState,
    pub id: Option<StageId>,
    pub type_tag: Option<TypeTag>,
    pub owner: Option<OwnerId>,
    pub owned_by_caller: bool,
    pub target: PathBuf,
    pub staging_root: PathBuf,
    pub stage_directory: Option<PathBuf>,
    pub apply_started_at: Option<DateTime<Utc>>,
    pub applying: bool,
    pub changes_applied: bool,
    pub failure_marker: Option<MarkerRecord>,
    /// A marker file exists but could not be parsed. It still blocks new stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_marker_unreadable: Option<String>,
}

pub struct Stage {
    stage_type: StageType,
    owner: OwnerId,
    target: PathBuf,
    default_staging_root: PathBuf,
    store: SharedStore,
    ownership: OwnershipLock,
    marker: FailureMarker,
    pipeline: ValidatorPipeline,
    exclusions: ExclusionSet,
    engine: Arc<dyn StagingEngine>,
    clock: Arc<dyn Clock>,
    /// When this process started working with the stage.
    request_time: DateTime<Utc>,
    lock: Option<StageLock>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("stage_type", &self.stage_type)
            .field("owner", &self.owner)
            .field("target", &self.target)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl Stage {
    pub fn new(
        stage_type: StageType,
        owner: OwnerId,
        layout: &StoreLayout,
        target: impl Into<PathBuf>,
        engine: Arc<dyn StagingEngine>,
    ) -> Self {
        let target = target.into();
        let store = SharedStore::new(layout.clone(), STAGE_COLLECTION);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            stage_type,
            owner,
            marker: FailureMarker::new(&target),
            target,
            default_staging_root: layout.staging_dir(),
            ownership: OwnershipLock::new(store.clone()),
            store,
            pipeline: ValidatorPipeline::new(),
            exclusions: ExclusionSet::new().with(FailureMarkerFile),
            engine,
            request_time: clock.now(),
            clock,
            lock: None,
        }
    }

    /// Build a stage for the target, staging root, and exclusions in `config`.
    pub fn from_config(
        stage_type: StageType,
        owner: OwnerId,
        layout: &StoreLayout,
        config: &SluiceConfig,
        engine: Arc<dyn StagingEngine>,
    ) -> Self {
        let mut stage = Self::new(stage_type, owner, layout, &config.paths.target, engine)
            .with_exclusions(ExclusionSet::standard(
                &config.exclude.paths,
                config.exclude.vcs,
            ));
        if let Some(root) = &config.paths.staging_root {
            stage = stage.with_staging_root(root);
        }
        stage
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: ValidatorPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    #[must_use]
    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    #[must_use]
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.default_staging_root = root.into();
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.request_time = clock.now();
        self.clock = clock;
        self
    }

    pub fn stage_type(&self) -> &StageType {
        &self.stage_type
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn failure_marker(&self) -> &FailureMarker {
        &self.marker
    }

    pub fn pipeline(&self) -> &ValidatorPipeline {
        &self.pipeline
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    pub fn request_time(&self) -> DateTime<Utc> {
        self.request_time
    }

    /// The claimed stage id, if this process holds a claim.
    pub fn id(&self) -> Option<&StageId> {
        self.lock.as_ref().map(|l| &l.id)
    }

    /// True iff no stage exists, for any owner.
    pub fn is_available(&self) -> Result<bool, CoreError> {
        self.ownership.is_available()
    }

    /// Create a new stage and claim it. Returns the id the owner must keep
    /// to claim the stage again from another process.
    pub fn create(&mut self, timeout: Option<Duration>) -> Result<StageId, CoreError> {
        self.marker.assert_not_exists()?;
        if !self.is_available()? {
            return Err(CoreError::AlreadyExists);
        }

        let id = StageId::generate();
        let lock = StageLock::new(id.clone(), self.stage_type.tag.clone());
        if !self.ownership.acquire(&self.owner, &lock)? {
            return Err(CoreError::AlreadyExists);
        }
        info!(
            "creating {} stage {} for {}",
            self.stage_type.tag,
            id.short(),
            self.owner
        );

        // Leftovers of a destroy that was interrupted before the lock was released.
        for key in [METADATA_KEY, APPLY_TIME_KEY, CHANGES_APPLIED_KEY] {
            self.store.delete(key)?;
        }
        self.prune_destroy_notes();
        self.store
            .set(&self.owner, STAGING_ROOT_KEY, &self.default_staging_root)?;
        self.claim(&id)?;

        let excluded = match self.exclusions.collect(&self.target) {
            Ok(paths) => paths,
            Err(e) => {
                self.release_after_failed_create();
                return Err(CoreError::Stage(format!(
                    "Unable to collect the paths to exclude: {e}"
                )));
            }
        };

        let dispatched = {
            let mut event =
                LifecycleEvent::new(Phase::PreCreate, self).with_excluded_paths(excluded);
            self.pipeline
                .dispatch(&mut event)
                .map(|()| event.into_excluded_paths())
        };
        let excluded = match dispatched {
            Ok(paths) => paths,
            Err(e) => {
                self.release_after_failed_create();
                return Err(e);
            }
        };

        let stage_dir = self.stage_directory()?;
        if let Err(e) = self
            .engine
            .begin(&self.target, &stage_dir, &excluded, timeout)
        {
            warn!("begin failed for stage {}: {e}", id.short());
            if let Err(cleanup) = self.destroy(false, None) {
                warn!("could not destroy stage {} after failed begin: {cleanup}", id.short());
            }
            return Err(CoreError::Stage(e.to_string()));
        }

        self.dispatch(Phase::PostCreate)?;
        info!("stage {} created at {}", id.short(), stage_dir.display());
        Ok(id)
    }

    fn release_after_failed_create(&mut self) {
        if let Err(e) = self.mark_as_available() {
            warn!("could not release stage lock after failed create: {e}");
        }
    }

    /// Attach this process to an existing stage.
    pub fn claim(&mut self, id: &StageId) -> Result<&mut Self, CoreError> {
        self.marker.assert_not_exists()?;

        if self.is_available()? {
            return Err(CoreError::NotCreated(
                self.destroy_message_or(id, MSG_NOT_CREATED)?,
            ));
        }
        let Some(stored) = self.ownership.stored_for(&self.owner)? else {
            return Err(CoreError::NotOwner(
                self.destroy_message_or(id, MSG_NOT_OWNER)?,
            ));
        };
        if stored.id == *id && stored.tag == self.stage_type.tag {
            debug!("{} claimed stage {}", self.owner, id.short());
            self.lock = Some(stored);
            return Ok(self);
        }
        Err(CoreError::LockMismatch(
            self.destroy_message_or(id, MSG_LOCK_MISMATCH)?,
        ))
    }

    /// The recorded reason `id` was destroyed, or `default`.
    fn destroy_message_or(&self, id: &StageId, default: &str) -> Result<String, CoreError> {
        let key = format!("{DESTROYED_PREFIX}{id}");
        if validate_key(&key).is_err() {
            return Ok(default.to_owned());
        }
        Ok(self
            .store
            .get_as::<DestroyNote>(&key)?
            .map_or_else(|| default.to_owned(), |note| note.message))
    }

    /// Drop destroy notes older than [`DESTROY_NOTE_RETENTION_SECS`].
    /// Notes that cannot be read are dropped too.
    fn prune_destroy_notes(&self) {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("could not list destroy notes: {e}");
                return;
            }
        };
        let cutoff = self.clock.now() - TimeDelta::seconds(DESTROY_NOTE_RETENTION_SECS);
        for key in keys.iter().filter(|k| k.starts_with(DESTROYED_PREFIX)) {
            let expired = match self.store.get_as::<DestroyNote>(key) {
                Ok(Some(note)) => note.destroyed_at < cutoff,
                Ok(None) => false,
                Err(e) => {
                    warn!("dropping unreadable destroy note {key}: {e}");
                    true
                }
            };
            if expired {
                if let Err(e) = self.store.delete(key) {
                    warn!("could not prune destroy note {key}: {e}");
                } else {
                    debug!("pruned destroy note {key}");
                }
            }
        }
    }

    /// The claimed lock, after confirming the store still agrees.
    pub fn check_ownership(&self) -> Result<&StageLock, CoreError> {
        let Some(cached) = self.lock.as_ref() else {
            return match self.ownership.stored_owner()? {
                Some(owner) if owner != self.owner => {
                    Err(CoreError::NotOwner(MSG_OWNERSHIP_LOST.to_owned()))
                }
                _ => Err(CoreError::NotClaimed),
            };
        };
        let stored = self.ownership.stored_for(&self.owner)?;
        if stored.as_ref() != Some(cached) {
            return Err(CoreError::NotOwner(MSG_OWNERSHIP_LOST.to_owned()));
        }
        Ok(cached)
    }

    /// Parent directory of stage working copies, cached for the stage's lifetime.
    pub fn staging_root(&self) -> Result<PathBuf, CoreError> {
        Ok(self
            .store
            .get_as::<PathBuf>(STAGING_ROOT_KEY)?
            .unwrap_or_else(|| self.default_staging_root.clone()))
    }

    /// `<staging root>/<id>`. Only meaningful once the stage is claimed.
    pub fn stage_directory(&self) -> Result<PathBuf, CoreError> {
        let Some(lock) = self.lock.as_ref() else {
            return Err(CoreError::NotClaimed);
        };
        Ok(self.staging_root()?.join(lock.id.as_str()))
    }

    pub fn set_metadata<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CoreError> {
        self.check_ownership()?;
        let mut map: serde_json::Map<String, serde_json::Value> =
            self.store.get_as(METADATA_KEY)?.unwrap_or_default();
        map.insert(key.to_owned(), serde_json::to_value(value)?);
        self.store.set(&self.owner, METADATA_KEY, &map)?;
        Ok(())
    }

    pub fn get_metadata<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        self.check_ownership()?;
        let map: serde_json::Map<String, serde_json::Value> =
            self.store.get_as(METADATA_KEY)?.unwrap_or_default();
        match map.get(key) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    pub fn apply_started_at(&self) -> Result<Option<DateTime<Utc>>, CoreError> {
        Ok(self.store.get_as(APPLY_TIME_KEY)?)
    }

    pub fn changes_applied(&self) -> Result<bool, CoreError> {
        Ok(self.store.get_as(CHANGES_APPLIED_KEY)?.unwrap_or(false))
    }

    /// An apply started less than the staleness window ago.
    pub fn is_applying(&self) -> Result<bool, CoreError> {
        let window = TimeDelta::seconds(STALENESS_WINDOW_SECS);
        Ok(self
            .apply_started_at()?
            .is_some_and(|started| self.clock.now() - started < window))
    }

    pub fn state(&self) -> Result<StageState, CoreError> {
        Ok(StageState::derive(
            !self.is_available()?,
            self.is_applying()?,
            self.changes_applied()?,
        ))
    }

    /// Stage a change set into the working copy.
    ///
    /// A change operation that fails after it may have touched the working
    /// copy leaves it indeterminate, so the stage is destroyed.
    pub fn modify(
        &mut self,
        change_set: &ChangeSet,
        timeout: Option<Duration>,
    ) -> Result<(), CoreError> {
        self.check_ownership()?;
        if change_set.is_empty() {
            return Err(CoreError::Stage("No packages were given.".to_owned()));
        }
        change_set.validate()?;
        validate_transition(self.state()?, StageState::Modifying)?;

        {
            let mut event = LifecycleEvent::new(Phase::PreModify, self).with_change_set(change_set);
            self.pipeline.dispatch(&mut event)?;
        }

        let stage_dir = self.stage_directory()?;
        for command in change_set.commands() {
            info!("staging: {}", command.join(" "));
            match self
                .engine
                .stage(&command, &self.target, &stage_dir, &[], timeout)
            {
                Ok(()) => {}
                Err(e) if e.is_precondition() => return Err(CoreError::Stage(e.to_string())),
                Err(e) => {
                    warn!("change operation failed, destroying stage: {e}");
                    if let Err(cleanup) = self.destroy(false, None) {
                        warn!("could not destroy stage after failed change: {cleanup}");
                    }
                    return Err(CoreError::Stage(e.to_string()));
                }
            }
        }

        let mut event = LifecycleEvent::new(Phase::PostModify, self).with_change_set(change_set);
        self.pipeline.dispatch(&mut event)
    }

    /// Copy the working copy over the target.
    ///
    /// The failure marker exists for exactly as long as the commit may leave
    /// the target half-written. A commit that fails before copying removes
    /// it again; any later failure keeps it and returns
    /// [`CoreError::ApplyFailed`].
    pub fn apply(&mut self, timeout: Option<Duration>) -> Result<(), CoreError> {
        self.check_ownership()?;
        self.marker.assert_not_exists()?;
        if self.is_applying()? {
            return Err(CoreError::Stage(
                "Cannot apply the stage because it is already being applied.".to_owned(),
            ));
        }
        validate_transition(self.state()?, StageState::Applying)?;

        let excluded = self
            .exclusions
            .collect(&self.target)
            .map_err(|e| CoreError::Stage(format!("Unable to collect the paths to exclude: {e}")))?;

        self.store
            .set(&self.owner, APPLY_TIME_KEY, &self.request_time)?;

        let dispatched = {
            let mut event =
                LifecycleEvent::new(Phase::PreApply, self).with_excluded_paths(excluded);
            self.pipeline
                .dispatch(&mut event)
                .map(|()| event.into_excluded_paths())
        };
        let mut excluded = match dispatched {
            Ok(paths) => paths,
            Err(e) => {
                self.clear_apply_time_best_effort();
                return Err(e);
            }
        };

        if let Err(e) = self.marker.write(&self.stage_type, None, self.clock.now()) {
            self.clear_apply_time_best_effort();
            return Err(e);
        }
        let marker = PathBuf::from(MARKER_FILE_NAME);
        if !excluded.contains(&marker) {
            excluded.push(marker);
        }

        let stage_dir = self.stage_directory()?;
        info!("applying stage to {}", self.target.display());
        match self
            .engine
            .commit(&stage_dir, &self.target, &excluded, timeout)
        {
            Ok(()) => {
                self.marker.clear()?;
                self.store.set(&self.owner, CHANGES_APPLIED_KEY, &true)?;
                info!("stage applied to {}", self.target.display());
                Ok(())
            }
            Err(e) if e.is_precondition() => {
                warn!("commit refused before copying: {e}");
                self.marker.clear()?;
                self.clear_apply_time_best_effort();
                Err(CoreError::Stage(e.to_string()))
            }
            Err(e) => {
                error!("commit failed, target may be inconsistent: {e}");
                self.clear_apply_time_best_effort();
                let cause = e.to_string();
                let message = match self
                    .marker
                    .write(&self.stage_type, Some(&cause), self.clock.now())
                    .and_then(|()| self.marker.read())
                {
                    Ok(Some(record)) => record.describe(),
                    Ok(None) | Err(_) => {
                        format!("{} Caused by: {cause}", self.stage_type.failure_message)
                    }
                };
                Err(CoreError::ApplyFailed { message })
            }
        }
    }

    /// Run post-apply validators. Expected in a fresh process after `apply`.
    pub fn post_apply(&mut self) -> Result<(), CoreError> {
        self.check_ownership()?;
        validate_transition(self.state()?, StageState::Applied)?;
        if self.apply_started_at()? == Some(self.request_time) {
            warn!(
                "post_apply() was called in the same process as apply(); \
                 post-apply work should run in a fresh process"
            );
        }
        let dispatched = self.dispatch(Phase::PostApply);
        let cleared = self.clear_apply_time();
        dispatched?;
        cleared
    }

    /// Delete the working copy and release the lock.
    ///
    /// Without `force` the caller must hold the claim. With `force` anyone may
    /// destroy the stage, but never while an apply is inside the staleness
    /// window.
    pub fn destroy(
        &mut self,
        force: bool,
        message: Option<&str>,
    ) -> Result<CleanupOutcome, CoreError> {
        if !force {
            self.check_ownership()?;
        }
        if self.is_applying()? {
            return Err(CoreError::Stage(
                "Cannot destroy the stage directory while it is being applied to the active directory."
                    .to_owned(),
            ));
        }
        let Some(stored) = self.ownership.stored()? else {
            return Err(CoreError::NotCreated(
                "Cannot destroy the stage because no stage has been created.".to_owned(),
            ));
        };
        validate_transition(self.state()?, StageState::Destroyed)?;

        self.dispatch(Phase::PreDestroy)?;

        let staging_root = self.staging_root()?;
        let outcome = remove_tree(&staging_root.join(stored.id.as_str()));
        // Only succeeds once no other working copy is left in it.
        let _ = fs::remove_dir(&staging_root);

        self.store_destroy_info(&stored.id, force, message)?;
        self.mark_as_available()?;
        info!("stage {} destroyed ({outcome:?})", stored.id.short());

        self.dispatch(Phase::PostDestroy)?;
        Ok(outcome)
    }

    fn store_destroy_info(
        &self,
        id: &StageId,
        force: bool,
        message: Option<&str>,
    ) -> Result<(), CoreError> {
        let message = match message {
            Some(m) => m.to_owned(),
            None if self.changes_applied()? => "This operation has already been applied.".to_owned(),
            None if force => "This operation was canceled by another user.".to_owned(),
            None => "This operation was already canceled.".to_owned(),
        };
        let note = DestroyNote {
            message,
            destroyed_at: self.clock.now(),
        };
        self.store
            .set(&self.owner, &format!("{DESTROYED_PREFIX}{id}"), &note)?;
        Ok(())
    }

    /// Forget the stage. The lock goes last so an interrupted cleanup still
    /// shows a stage to destroy.
    fn mark_as_available(&mut self) -> Result<(), CoreError> {
        for key in [
            METADATA_KEY,
            STAGING_ROOT_KEY,
            APPLY_TIME_KEY,
            CHANGES_APPLIED_KEY,
        ] {
            self.store.delete(key)?;
        }
        self.ownership.release()?;
        self.lock = None;
        Ok(())
    }

    fn clear_apply_time(&self) -> Result<(), CoreError> {
        self.store.delete(APPLY_TIME_KEY)?;
        Ok(())
    }

    fn clear_apply_time_best_effort(&self) {
        if let Err(e) = self.clear_apply_time() {
            warn!("could not clear apply start time: {e}");
        }
    }

    fn dispatch(&self, phase: Phase) -> Result<(), CoreError> {
        let mut event = LifecycleEvent::new(phase, self);
        self.pipeline.dispatch(&mut event)
    }

    pub fn inspect(&self) -> Result<StageInfo, CoreError> {
        let stored = self.ownership.stored()?;
        let owner = self.ownership.stored_owner()?;
        let staging_root = self.staging_root()?;
        let (failure_marker, failure_marker_unreadable) = match self.marker.read() {
            Ok(record) => (record, None),
            Err(e) => {
                warn!("unreadable failure marker at {}: {e}", self.marker.path().display());
                (None, Some(e.to_string()))
            }
        };
        Ok(StageInfo {
            state: self.state()?,
            type_tag: stored.as_ref().map(|l| l.tag.clone()),
            owned_by_caller: owner.as_ref() == Some(&self.owner),
            owner,
            stage_directory: stored.as_ref().map(|l| staging_root.join(l.id.as_str())),
            id: stored.map(|l| l.id),
            target: self.target.clone(),
            staging_root,
            apply_started_at: self.apply_started_at()?,
            applying: self.is_applying()?,
            changes_applied: self.changes_applied()?,
            failure_marker,
            failure_marker_unreadable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use sluice_engine::{EngineOp, MockFailure};
    use sluice_schema::Requirement;

    fn change_set() -> ChangeSet {
        ChangeSet::new(vec![Requirement::parse("acme/log:^2").unwrap()], Vec::new())
    }

    #[test]
    fn create_claims_and_copies() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        assert!(stage.is_available().unwrap());
        let id = stage.create(None).unwrap();

        assert!(!stage.is_available().unwrap());
        assert_eq!(stage.id(), Some(&id));
        assert_eq!(stage.state().unwrap(), StageState::Created);
        let dir = stage.stage_directory().unwrap();
        assert_eq!(dir, fx.layout.staging_dir().join(id.as_str()));
        assert!(dir.join("index.php").is_file());
        assert_eq!(fx.engine.calls_of(EngineOp::Begin).len(), 1);
    }

    #[test]
    fn stage_directory_requires_claim() {
        let fx = Fixture::new();
        let stage = fx.stage("alice");
        assert!(matches!(stage.stage_directory(), Err(CoreError::NotClaimed)));
    }

    #[test]
    fn begin_excludes_marker_file() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        let begin = &fx.engine.calls_of(EngineOp::Begin)[0];
        assert!(begin.exclusions.contains(&PathBuf::from(MARKER_FILE_NAME)));
    }

    #[test]
    fn staging_root_is_cached_until_destroy() {
        let fx = Fixture::new();
        let custom = fx.dir.path().join("scratch");
        let mut stage = fx.stage("alice").with_staging_root(&custom);
        let id = stage.create(None).unwrap();

        // A later process configured differently still finds the working copy.
        let mut other = fx.stage("alice");
        other.claim(&id).unwrap();
        assert_eq!(other.stage_directory().unwrap(), custom.join(id.as_str()));

        other.destroy(false, None).unwrap();
        assert_eq!(other.staging_root().unwrap(), fx.layout.staging_dir());
    }

    #[test]
    fn metadata_roundtrip_requires_ownership() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        assert!(matches!(
            stage.set_metadata("k", &1),
            Err(CoreError::NotClaimed)
        ));
        stage.create(None).unwrap();
        stage.set_metadata("requested_by", &"cron").unwrap();
        stage.set_metadata("attempt", &2).unwrap();
        assert_eq!(
            stage.get_metadata::<String>("requested_by").unwrap().as_deref(),
            Some("cron")
        );
        assert_eq!(stage.get_metadata::<u32>("attempt").unwrap(), Some(2));
        assert_eq!(stage.get_metadata::<u32>("missing").unwrap(), None);
    }

    #[test]
    fn modify_runs_change_commands() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        stage.modify(&change_set(), None).unwrap();
        let commands: Vec<Vec<String>> = fx
            .engine
            .calls_of(EngineOp::Stage)
            .into_iter()
            .map(|c| c.command)
            .collect();
        assert_eq!(commands, change_set().commands());
    }

    #[test]
    fn modify_rejects_empty_change_set() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        assert!(matches!(
            stage.modify(&ChangeSet::default(), None),
            Err(CoreError::Stage(_))
        ));
        assert!(fx.engine.calls_of(EngineOp::Stage).is_empty());
    }

    #[test]
    fn modify_failure_destroys_stage() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        let id = stage.create(None).unwrap();
        let dir = stage.stage_directory().unwrap();
        fx.engine
            .fail_on(EngineOp::Stage, MockFailure::Failed("resolver error".to_owned()));

        let err = stage.modify(&change_set(), None).unwrap_err();
        assert!(matches!(err, CoreError::Stage(ref m) if m.contains("resolver error")));
        assert!(stage.is_available().unwrap());
        assert!(!dir.exists());

        let mut again = fx.stage("alice");
        let err = again.claim(&id).unwrap_err();
        assert_eq!(err.to_string(), "This operation was already canceled.");
    }

    #[test]
    fn modify_precondition_failure_keeps_stage() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        fx.engine.fail_on(
            EngineOp::Stage,
            MockFailure::Precondition("composer missing".to_owned()),
        );
        assert!(matches!(
            stage.modify(&change_set(), None),
            Err(CoreError::Stage(_))
        ));
        assert!(!stage.is_available().unwrap());
        stage.check_ownership().unwrap();
    }

    #[test]
    fn begin_failure_destroys_stage() {
        let fx = Fixture::new();
        fx.engine
            .fail_on(EngineOp::Begin, MockFailure::Failed("rsync exited 23".to_owned()));
        let mut stage = fx.stage("alice");
        let err = stage.create(None).unwrap_err();
        assert!(matches!(err, CoreError::Stage(ref m) if m.contains("rsync exited 23")));
        assert!(stage.is_available().unwrap());
    }

    #[test]
    fn apply_copies_and_records() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        stage.modify(&change_set(), None).unwrap();
        stage.apply(None).unwrap();

        assert!(fx.target.join(sluice_engine::mock::MOCK_LOG).is_file());
        assert!(!stage.failure_marker().exists());
        assert!(stage.changes_applied().unwrap());
        assert_eq!(stage.apply_started_at().unwrap(), Some(stage.request_time()));
        assert!(stage.is_applying().unwrap());
        assert_eq!(stage.state().unwrap(), StageState::Applied);

        let commit = &fx.engine.calls_of(EngineOp::Commit)[0];
        assert!(commit.exclusions.contains(&PathBuf::from(MARKER_FILE_NAME)));
    }

    #[test]
    fn apply_twice_while_applying_is_refused() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        stage.apply(None).unwrap();
        assert!(matches!(stage.apply(None), Err(CoreError::Stage(_))));
    }

    #[test]
    fn post_apply_clears_apply_time() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        let id = stage.create(None).unwrap();
        stage.apply(None).unwrap();

        let mut fresh = fx.stage("alice");
        fresh.claim(&id).unwrap();
        fresh.post_apply().unwrap();
        assert_eq!(fresh.apply_started_at().unwrap(), None);
        assert!(!fresh.is_applying().unwrap());

        fresh.destroy(false, None).unwrap();
        let err = fx.stage("alice").claim(&id).unwrap_err();
        assert_eq!(err.to_string(), "This operation has already been applied.");
    }

    #[test]
    fn post_apply_before_apply_is_invalid() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        assert!(matches!(
            stage.post_apply(),
            Err(CoreError::InvalidTransition {
                from: StageState::Created,
                to: StageState::Applied
            })
        ));
    }

    #[test]
    fn destroy_reports_cleanup_outcome() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        let dir = stage.stage_directory().unwrap();
        let outcome = stage.destroy(false, None).unwrap();
        assert_eq!(outcome, CleanupOutcome::Removed { path: dir.clone() });
        assert!(!dir.exists());
        assert!(stage.id().is_none());
    }

    #[test]
    fn destroy_with_missing_directory_is_not_present() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        let dir = stage.stage_directory().unwrap();
        fs::remove_dir_all(&dir).unwrap();
        assert_eq!(
            stage.destroy(false, None).unwrap(),
            CleanupOutcome::NotPresent { path: dir }
        );
    }

    #[test]
    fn destroy_custom_message_reported_on_claim() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        let id = stage.create(None).unwrap();
        stage
            .destroy(false, Some("Superseded by a newer update."))
            .unwrap();
        let err = fx.stage("alice").claim(&id).unwrap_err();
        assert!(matches!(err, CoreError::NotCreated(ref m) if m == "Superseded by a newer update."));
    }

    #[test]
    fn destroy_nothing_forced_is_not_created() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        assert!(matches!(
            stage.destroy(true, None),
            Err(CoreError::NotCreated(_))
        ));
    }

    #[test]
    fn inspect_reports_owner_and_state() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        let info = stage.inspect().unwrap();
        assert_eq!(info.state, StageState::Unavailable);
        assert!(info.id.is_none());

        let id = stage.create(None).unwrap();
        let info = fx.stage("bob").inspect().unwrap();
        assert_eq!(info.state, StageState::Created);
        assert_eq!(info.id, Some(id));
        assert_eq!(info.owner, Some(OwnerId::new("alice")));
        assert!(!info.owned_by_caller);
        assert!(info.failure_marker.is_none());
        assert!(info.failure_marker_unreadable.is_none());
    }

    #[test]
    fn inspect_reports_unreadable_marker() {
        let fx = Fixture::new();
        fs::write(fx.target.join(MARKER_FILE_NAME), "{ truncated").unwrap();

        let info = fx.stage("alice").inspect().unwrap();
        assert!(info.failure_marker.is_none());
        assert!(info.failure_marker_unreadable.is_some());
        assert!(matches!(
            fx.stage("alice").create(None),
            Err(CoreError::CrashedState(_))
        ));
    }

    fn note_key(id: &StageId) -> String {
        format!("{DESTROYED_PREFIX}{id}")
    }

    #[test]
    fn create_prunes_expired_destroy_notes() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        let old = stage.create(None).unwrap();
        stage.destroy(false, Some("superseded")).unwrap();

        fx.clock.advance(TimeDelta::seconds(DESTROY_NOTE_RETENTION_SECS - 60));
        let mut stage = fx.stage("alice");
        let recent = stage.create(None).unwrap();
        stage.destroy(false, None).unwrap();
        assert!(stage.store.has(&note_key(&old)).unwrap());

        fx.clock.advance(TimeDelta::seconds(120));
        let mut stage = fx.stage("alice");
        stage.create(None).unwrap();
        assert!(!stage.store.has(&note_key(&old)).unwrap());
        assert!(stage.store.has(&note_key(&recent)).unwrap());
    }

    #[test]
    fn create_drops_unreadable_destroy_notes() {
        let fx = Fixture::new();
        let mut stage = fx.stage("alice");
        stage
            .store
            .set(&OwnerId::new("alice"), "destroyed.legacy", &"plain text")
            .unwrap();
        stage.create(None).unwrap();
        assert!(!stage.store.has("destroyed.legacy").unwrap());
    }
}
