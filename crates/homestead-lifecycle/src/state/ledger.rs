//! Durable record of which applications are registered for autostart.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use homestead_config::write_json_atomically;

use crate::error::PersistError;

/// JSON document mapping application ids to their autostart flag.
///
/// Only enabled applications are stored; an absent id reads as `false`.
/// Every change rewrites the whole document atomically before the in-memory
/// copy is updated, so a failed write leaves both untouched.
#[derive(Debug)]
pub struct AutostartLedger {
    path: Option<PathBuf>,
    flags: Mutex<BTreeMap<String, bool>>,
}

impl AutostartLedger {
    /// Creates a ledger that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            flags: Mutex::new(BTreeMap::new()),
        }
    }

    /// Loads the ledger at `path`, starting empty when the file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Read`] or [`PersistError::Parse`] when the file
    /// exists but cannot be used.
    pub fn load(location: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = location.into();
        let flags = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| PersistError::Parse {
                path: path.clone(),
                source: Arc::new(source),
            })?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                return Err(PersistError::Read {
                    path,
                    source: Arc::new(error),
                });
            }
        };
        Ok(Self {
            path: Some(path),
            flags: Mutex::new(flags),
        })
    }

    /// Backing file, if the ledger is durable.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the recorded flag for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> bool {
        self.lock().get(id).copied().unwrap_or(false)
    }

    /// Records the flag for `id`, persisting the ledger first.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Write`] when the document cannot be written;
    /// the recorded flags are left unchanged.
    pub fn set(&self, id: &str, enabled: bool) -> Result<(), PersistError> {
        let mut flags = self.lock();
        let mut next = flags.clone();
        if enabled {
            next.insert(id.to_owned(), true);
        } else {
            next.remove(id);
        }
        if next == *flags {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_json_atomically(path, &next).map_err(|source| PersistError::Write {
                path: path.clone(),
                source: Arc::new(source),
            })?;
        }
        *flags = next;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, bool>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AutostartLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}
