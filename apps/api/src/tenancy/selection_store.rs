//! Durable single-slot storage for the last chosen company of one client profile.
//!
//! The slot holds a bare identifier string. Nothing here validates it: a value
//! that matches no membership is healed by the resolver's drift rule.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Fixed key of the slot. Also the file name used by [`FileSelectionStore`].
pub const SELECTION_STORAGE_KEY: &str = "active_company_id";

pub trait SelectionStore: Send {
    /// Never fails: an unreadable or missing slot reads as `None`.
    fn read(&self) -> Option<String>;
    fn write(&mut self, company_id: &str);
    fn clear(&mut self);
}

/// One file per profile: `<root>/<profile>/active_company_id`.
///
/// Reads and writes are plain blocking `std::fs` calls made under the
/// profile's resolver lock. The slot is a few bytes on local disk and only
/// that profile's requests wait on it; moving to `spawn_blocking` would need
/// the write to happen outside the lock.
#[derive(Debug, Clone)]
pub struct FileSelectionStore {
    path: PathBuf,
}

impl FileSelectionStore {
    pub fn new(profile_dir: impl AsRef<Path>) -> Self {
        Self {
            path: profile_dir.as_ref().join(SELECTION_STORAGE_KEY),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SelectionStore for FileSelectionStore {
    fn read(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let value = raw.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Selection slot {} unreadable: {e}", self.path.display());
                None
            }
        }
    }

    fn write(&mut self, company_id: &str) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Cannot create selection dir {}: {e}", parent.display());
                return;
            }
        }
        match fs::write(&self.path, company_id) {
            Ok(()) => debug!("Persisted selection {company_id} to {}", self.path.display()),
            Err(e) => warn!("Cannot persist selection to {}: {e}", self.path.display()),
        }
    }

    fn clear(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Cleared selection at {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot clear selection at {}: {e}", self.path.display()),
        }
    }
}

/// In-process slot. Used by tests in place of the file store.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemorySelectionStore {
    value: Option<String>,
}

#[cfg(test)]
impl MemorySelectionStore {
    pub fn with_value(value: &str) -> Self {
        Self {
            value: Some(value.to_string()),
        }
    }
}

#[cfg(test)]
impl SelectionStore for MemorySelectionStore {
    fn read(&self) -> Option<String> {
        self.value.clone()
    }

    fn write(&mut self, company_id: &str) {
        self.value = Some(company_id.to_string());
    }

    fn clear(&mut self) {
        self.value = None;
    }
}
