//! Revoked-capability sets.
//!
//! Membership is monotonic: revocations are never undone. The issuer holds
//! the authoritative set; each resource service holds an independent
//! replica. Both persist to an append-only JSON-lines log under the runtime
//! directory and replay it at startup, so a restart cannot resurrect a
//! revoked capability before it expires.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors from revocation-store operations.
#[derive(Debug, Error)]
pub enum RevocationError {
    /// I/O failure on the append-only log.
    #[error("revocation log: {0}")]
    Io(#[from] std::io::Error),

    /// Record failed to encode.
    #[error("revocation record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One line of the append-only log.
#[derive(Debug, Serialize, Deserialize)]
struct RevocationRecord {
    capability_id: String,
    revoked_at: DateTime<Utc>,
}

/// Thread-safe, monotonic set of revoked capability ids.
#[derive(Debug, Default)]
pub struct RevocationSet {
    revoked: RwLock<HashSet<String>>,
}

impl RevocationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `capability_id`. Returns true if it was newly added.
    pub fn revoke(&self, capability_id: &str) -> bool {
        self.revoked
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(capability_id.to_string())
    }

    /// Membership test.
    #[must_use]
    pub fn is_revoked(&self, capability_id: &str) -> bool {
        self.revoked
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(capability_id)
    }

    /// Number of revoked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revoked
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether no id has been revoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Revoked-capability set backed by an append-only log.
///
/// `revoke` flushes the log record before returning, so acknowledgement
/// implies durability. Reads are served from the in-memory set.
pub struct RevocationStore {
    set: RevocationSet,
    log: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl RevocationStore {
    /// Creates a store with no backing log. Used in tests and anywhere
    /// durability is not required.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            set: RevocationSet::new(),
            log: None,
            path: None,
        }
    }

    /// Opens the store at `path`, replaying any existing records.
    ///
    /// Malformed lines (e.g. a torn final write) are skipped with a
    /// warning; every well-formed record is honored.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened for appending.
    pub fn open(path: &Path) -> Result<Self, RevocationError> {
        let set = RevocationSet::new();

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RevocationRecord>(&line) {
                    Ok(record) => {
                        set.revoke(&record.capability_id);
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            line = lineno + 1,
                            "skipping malformed revocation record: {e}"
                        );
                    }
                }
            }
        }

        let log = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            set,
            log: Some(Mutex::new(log)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Revokes `capability_id`: inserts into the set and, for newly revoked
    /// ids, appends a record and flushes it before returning.
    ///
    /// Idempotent: revoking an already-revoked id succeeds without a second
    /// log record.
    ///
    /// # Errors
    ///
    /// Returns an error if the log write fails; the in-memory set still
    /// contains the id in that case, so the current process keeps denying.
    pub fn revoke(&self, capability_id: &str) -> Result<(), RevocationError> {
        let newly_revoked = self.set.revoke(capability_id);
        if !newly_revoked {
            return Ok(());
        }

        if let Some(log) = &self.log {
            let record = RevocationRecord {
                capability_id: capability_id.to_string(),
                revoked_at: Utc::now(),
            };
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');

            let mut file = log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            file.write_all(&line)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Membership test against the in-memory set.
    #[must_use]
    pub fn is_revoked(&self, capability_id: &str) -> bool {
        self.set.is_revoked(capability_id)
    }

    /// Path of the backing log, when one exists.
    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_monotonic_and_idempotent() {
        let set = RevocationSet::new();
        assert!(!set.is_revoked("a"));
        assert!(set.revoke("a"));
        assert!(!set.revoke("a"));
        assert!(set.is_revoked("a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn in_memory_store_tracks_revocations() {
        let store = RevocationStore::in_memory();
        store.revoke("cap1").unwrap();
        assert!(store.is_revoked("cap1"));
        assert!(!store.is_revoked("cap2"));
        assert!(store.log_path().is_none());
    }

    #[test]
    fn reopened_store_replays_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.revoked.log");

        {
            let store = RevocationStore::open(&path).unwrap();
            store.revoke("cap1").unwrap();
            store.revoke("cap2").unwrap();
        }

        let store = RevocationStore::open(&path).unwrap();
        assert!(store.is_revoked("cap1"));
        assert!(store.is_revoked("cap2"));
        assert!(!store.is_revoked("cap3"));
    }

    #[test]
    fn duplicate_revocations_append_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.revoked.log");

        let store = RevocationStore::open(&path).unwrap();
        store.revoke("cap1").unwrap();
        store.revoke("cap1").unwrap();
        drop(store);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.revoked.log");
        let good = serde_json::json!({
            "capability_id": "cap1",
            "revoked_at": "2026-01-01T00:00:00Z",
        });
        std::fs::write(&path, format!("{good}\nnot-json\n")).unwrap();

        let store = RevocationStore::open(&path).unwrap();
        assert!(store.is_revoked("cap1"));
    }
}
