//! The single global stage lock and its owner-scoped reads.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use sluice_schema::{OwnerId, StageId, TypeTag};
use sluice_store::SharedStore;
use tracing::debug;

pub const LOCK_KEY: &str = "lock";

/// `(id, type tag)` proving which stage holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLock {
    pub id: StageId,
    pub tag: TypeTag,
}

impl StageLock {
    pub fn new(id: StageId, tag: TypeTag) -> Self {
        Self { id, tag }
    }
}

/// One key in the shared store. Anyone can see whether it is taken; only the
/// owner who wrote it can read it back through [`stored_for`](Self::stored_for).
#[derive(Debug, Clone)]
pub struct OwnershipLock {
    store: SharedStore,
}

impl OwnershipLock {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// No stage exists, for any owner.
    pub fn is_available(&self) -> Result<bool, CoreError> {
        Ok(!self.store.has(LOCK_KEY)?)
    }

    /// Atomically take the lock. Returns `false` if it is already held.
    pub fn acquire(&self, owner: &OwnerId, lock: &StageLock) -> Result<bool, CoreError> {
        let won = self.store.set_if_absent(owner, LOCK_KEY, lock)?;
        if won {
            debug!("stage lock {} acquired by {owner}", lock.id.short());
        }
        Ok(won)
    }

    /// The stored lock, whoever owns it.
    pub fn stored(&self) -> Result<Option<StageLock>, CoreError> {
        Ok(self.store.get_as(LOCK_KEY)?)
    }

    pub fn stored_owner(&self) -> Result<Option<OwnerId>, CoreError> {
        Ok(self.store.record(LOCK_KEY)?.map(|r| r.owner))
    }

    /// The stored lock if `owner` holds it.
    pub fn stored_for(&self, owner: &OwnerId) -> Result<Option<StageLock>, CoreError> {
        Ok(self.store.get_if_owner_as(owner, LOCK_KEY)?)
    }

    pub fn release(&self) -> Result<(), CoreError> {
        self.store.delete(LOCK_KEY)?;
        debug!("stage lock released");
        Ok(())
    }
}
