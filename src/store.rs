//! Single-slot persistent store for the last task options.
//!
//! The in-memory slot is swapped whole under one lock. When file-backed,
//! each save writes a uniquely named temp file and renames it over the
//! target, so a reader in this or a restarted process sees either the
//! complete previous value or the complete new one.

use crate::error::{Result, RunnerError};
use crate::options::TaskOptions;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct StoredOptions {
    #[serde(default = "default_store_version")]
    version: u8,
    options: TaskOptions,
}

fn default_store_version() -> u8 {
    1
}

#[derive(Debug, Default)]
struct Slot {
    /// `true` once the file (if any) has been consulted.
    hydrated: bool,
    value: Option<Arc<TaskOptions>>,
}

/// Last-write-wins holder for [`TaskOptions`].
#[derive(Debug)]
pub struct OptionStore {
    path: Option<PathBuf>,
    slot: Mutex<Slot>,
}

impl OptionStore {
    /// Process-local store; survives nothing beyond this value.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            slot: Mutex::new(Slot {
                hydrated: true,
                value: None,
            }),
        }
    }

    /// Store backed by a JSON file that outlives the process.
    pub fn file_backed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the stored options with a copy of `options`.
    pub fn save(&self, options: &TaskOptions) -> Result<()> {
        let value = Arc::new(options.clone());
        let mut slot = self.lock_slot();
        if let Some(path) = &self.path {
            write_options_file(path, &value)?;
        }
        slot.value = Some(value);
        slot.hydrated = true;
        debug!("task options saved");
        Ok(())
    }

    /// Current options, or `None` on first run, after clear, or when the
    /// backing file is unreadable.
    pub fn load(&self) -> Option<TaskOptions> {
        let mut slot = self.lock_slot();
        if !slot.hydrated {
            slot.value = self.path.as_deref().and_then(read_options_file).map(Arc::new);
            slot.hydrated = true;
        }
        slot.value.as_deref().cloned()
    }

    /// Drop the stored options (memory and file).
    pub fn clear(&self) -> Result<()> {
        let mut slot = self.lock_slot();
        if let Some(path) = &self.path {
            remove_file_if_present(path, "options")?;
        }
        slot.value = None;
        slot.hydrated = true;
        debug!("task options cleared");
        Ok(())
    }

    /// Returns `true` if a task configuration is stored.
    pub fn has_options(&self) -> bool {
        self.load().is_some()
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        // A panic while holding the lock leaves a whole value in place.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_options_file(path: &Path) -> Option<TaskOptions> {
    read_json_file::<StoredOptions>(path, "options").map(|stored| stored.options)
}

fn write_options_file(path: &Path, options: &TaskOptions) -> Result<()> {
    let stored = StoredOptions {
        version: default_store_version(),
        options: options.clone(),
    };
    write_json_atomic(path, &stored, "options")
}

/// Read and decode a JSON file. Missing, unreadable and malformed files
/// all read as `None`; the latter two are logged.
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path, what: &str) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("cannot read {what} file {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring malformed {what} file at {}: {e}", path.display());
            None
        }
    }
}

/// Write `value` as JSON to a uniquely named temp file, then rename it
/// over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RunnerError::Storage(format!("failed to create {what} directory: {e}"))
        })?;
    }

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| RunnerError::Storage(format!("failed to serialize {what}: {e}")))?;

    let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp_path, json)
        .map_err(|e| RunnerError::Storage(format!("failed to write {what} temp file: {e}")))?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(RunnerError::Storage(format!(
            "failed to finalize {what} file: {e}"
        )));
    }
    Ok(())
}

/// Delete `path`; already gone counts as success.
pub(crate) fn remove_file_if_present(path: &Path, what: &str) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RunnerError::Storage(format!(
            "cannot delete {what} file {}: {e}",
            path.display()
        ))),
    }
}
