//! Handle table: binds open resources to the capability that opened them.
//!
//! Every live handle carries the id of the capability that opened it, and
//! only that capability may use it; other tokens are denied even when they
//! carry the same rights. Revocation checks happen on every access, so a
//! revoked capability's handles become unusable without walking the table.
//!
//! Blocking reads never hold the table lock: [`HandleTable::get`] duplicates
//! the file descriptor under the read lock and the caller reads from the
//! duplicate.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::SystemTime;

use thiserror::Error;
use tracing::debug;

/// Errors from handle lookup.
#[derive(Debug, Error)]
pub enum HandleError {
    /// No entry for the requested handle id.
    #[error("invalid handle")]
    NotFound,

    /// Duplicating the descriptor failed.
    #[error("handle I/O: {0}")]
    Io(#[from] io::Error),
}

struct HandleEntry {
    file: File,
    capability_id: String,
    path: PathBuf,
    #[allow(dead_code)] // Part of the handle record; not read on the hot path.
    created_at: SystemTime,
}

/// A checked-out view of a handle: the binding metadata plus a duplicated
/// descriptor that can be read without any table lock held.
pub struct HandleRef {
    /// Id of the capability that opened the handle.
    pub capability_id: String,
    /// Resolved absolute path of the underlying file.
    pub path: PathBuf,
    file: File,
}

impl HandleRef {
    /// Reads up to `buf.len()` bytes at `offset`, retrying short reads
    /// until the buffer is full or EOF. Returns the number of bytes read.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, if any.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Maps opaque handle ids to open files bound to their opening capability.
#[derive(Default)]
pub struct HandleTable {
    handles: RwLock<HashMap<String, HandleEntry>>,
    next_id: AtomicU64,
}

impl HandleTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path` for reading and stores a handle bound to
    /// `capability_id`. Returns the new handle id.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from opening the file.
    pub fn open(&self, path: &Path, capability_id: &str) -> io::Result<String> {
        let file = File::open(path)?;
        let abs_path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let id = format!("h{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let mut handles = self
            .handles
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        handles.insert(
            id.clone(),
            HandleEntry {
                file,
                capability_id: capability_id.to_string(),
                path: abs_path,
                created_at: SystemTime::now(),
            },
        );
        Ok(id)
    }

    /// Looks up a handle, returning its binding metadata and a duplicated
    /// descriptor for lock-free reading.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::NotFound`] for unknown ids, or an I/O error if
    /// the descriptor cannot be duplicated.
    pub fn get(&self, handle_id: &str) -> Result<HandleRef, HandleError> {
        let handles = self
            .handles
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = handles.get(handle_id).ok_or(HandleError::NotFound)?;
        Ok(HandleRef {
            capability_id: entry.capability_id.clone(),
            path: entry.path.clone(),
            file: entry.file.try_clone()?,
        })
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the table holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shutdown sweep: closes and forgets every handle.
    pub fn close_all(&self) {
        let mut handles = self
            .handles
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let count = handles.len();
        handles.clear();
        debug!(count, "closed all handles");
    }
}
