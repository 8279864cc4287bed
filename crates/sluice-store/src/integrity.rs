use crate::layout::StoreLayout;
use crate::shared::SharedStore;
use crate::StoreError;
use std::fs;

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub collections: usize,
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

#[derive(Debug)]
pub struct IntegrityFailure {
    pub key: String,
    pub reason: String,
}

/// Re-read every shared record and verify its embedded checksum.
pub fn verify_store_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let mut report = IntegrityReport::default();
    let shared_dir = layout.shared_dir();
    if !shared_dir.exists() {
        return Ok(report);
    }

    let mut collections = Vec::new();
    for entry in fs::read_dir(&shared_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                collections.push(name.to_owned());
            }
        }
    }
    collections.sort();
    report.collections = collections.len();

    for collection in &collections {
        let store = SharedStore::new(layout.clone(), collection);
        for key in store.keys()? {
            match store.record(&key) {
                Ok(Some(_)) => report.passed += 1,
                // Deleted between listing and reading.
                Ok(None) => continue,
                Err(StoreError::IntegrityFailure { actual, .. }) => {
                    report.failed.push(IntegrityFailure {
                        key: format!("{collection}/{key}"),
                        reason: format!("checksum mismatch: got {actual}"),
                    });
                }
                Err(e) => {
                    report.failed.push(IntegrityFailure {
                        key: format!("{collection}/{key}"),
                        reason: format!("read error: {e}"),
                    });
                }
            }
            report.checked += 1;
        }
    }

    Ok(report)
}
