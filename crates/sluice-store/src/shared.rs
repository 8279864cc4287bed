//! Owner-scoped persistent key-value store shared by every caller.
//!
//! Each key holds one value and remembers which owner wrote it. Plain reads
//! ignore ownership (anyone can see that a key is taken), owner-checked reads
//! only return values written by the given owner. Owners are passed explicitly
//! to every call; the store never caches a "current" owner.

use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::{fsync_dir, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_schema::OwnerId;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A stored value together with its owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedRecord {
    pub owner: OwnerId,
    pub value: Value,
    pub updated_at: String,
    /// blake3 checksum over the record without this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl SharedRecord {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > 200 || key.starts_with('.') {
        return Err(StoreError::InvalidKey(key.to_owned()));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(StoreError::InvalidKey(key.to_owned()));
    }
    Ok(())
}

/// One named collection of shared records.
#[derive(Debug, Clone)]
pub struct SharedStore {
    layout: StoreLayout,
    collection: String,
}

impl SharedStore {
    pub fn new(layout: StoreLayout, collection: &str) -> Self {
        Self {
            layout,
            collection: collection.to_owned(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn dir(&self) -> PathBuf {
        self.layout.collection_dir(&self.collection)
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir().join(key))
    }

    /// Read the full record for `key`, verifying its checksum.
    pub fn record(&self, key: &str) -> Result<Option<SharedRecord>, StoreError> {
        let path = self.path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: SharedRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    key: format!("{}/{key}", self.collection),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(record))
    }

    /// Value for `key`, whoever owns it.
    pub fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.record(key)?.map(|r| r.value))
    }

    /// Value for `key` only if `owner` wrote it.
    pub fn get_if_owner(&self, owner: &OwnerId, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .record(key)?
            .filter(|r| r.owner == *owner)
            .map(|r| r.value))
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub fn get_if_owner_as<T: DeserializeOwned>(
        &self,
        owner: &OwnerId,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get_if_owner(owner, key)? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path(key)?.exists())
    }

    /// Write `value` under `key`, taking ownership of the key.
    pub fn set<T: Serialize>(&self, owner: &OwnerId, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.write_record(owner, key, value)
    }

    /// Write `value` only if no record exists for `key`.
    ///
    /// The existence check and the write happen under the store lock, so two
    /// processes racing for the same key cannot both succeed. Returns whether
    /// this call created the record.
    pub fn set_if_absent<T: Serialize>(
        &self,
        owner: &OwnerId,
        key: &str,
        value: &T,
    ) -> Result<bool, StoreError> {
        let value = serde_json::to_value(value)?;
        let _guard = StoreLock::acquire(&self.layout.lock_file())?;
        if self.has(key)? {
            debug!("set_if_absent: {}/{key} already present", self.collection);
            return Ok(false);
        }
        self.write_record(owner, key, value)?;
        Ok(true)
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("deleted shared record {}/{key}", self.collection);
        }
        Ok(())
    }

    /// Keys currently present, sorted. Dotfiles (in-flight temp files) are skipped.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("skipping non-UTF-8 entry in {}", self.collection);
                continue;
            };
            if validate_key(name).is_ok() {
                keys.push(name.to_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn write_record(&self, owner: &OwnerId, key: &str, value: Value) -> Result<(), StoreError> {
        let dest = self.path(key)?;
        let dir = self.dir();
        fs::create_dir_all(&dir)?;

        let mut record = SharedRecord {
            owner: owner.clone(),
            value,
            updated_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        };
        record.checksum = Some(record.compute_checksum()?);
        let content = serde_json::to_string_pretty(&record)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        debug!("wrote shared record {}/{key} for {owner}", self.collection);
        Ok(())
    }
}
