//! Durable record of the armed daily schedule.
//!
//! Kept apart from the [`OptionStore`](crate::store::OptionStore): a stored
//! schedule means "re-arm on launch", never "a task was running".

use crate::error::Result;
use crate::options::TaskOptions;
use crate::scheduler::ScheduleSpec;
use crate::store::{read_json_file, remove_file_if_present, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// What was armed: the time of day and the options each fire starts with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    #[serde(default = "default_record_version")]
    pub version: u8,
    pub identity: String,
    pub spec: ScheduleSpec,
    pub options: TaskOptions,
}

fn default_record_version() -> u8 {
    1
}

impl ScheduleRecord {
    pub fn new(identity: impl Into<String>, spec: ScheduleSpec, options: TaskOptions) -> Self {
        Self {
            version: default_record_version(),
            identity: identity.into(),
            spec,
            options,
        }
    }
}

#[derive(Debug, Default)]
struct Cached {
    hydrated: bool,
    record: Option<ScheduleRecord>,
}

/// Single-slot holder for the [`ScheduleRecord`].
#[derive(Debug)]
pub struct ScheduleStore {
    path: Option<PathBuf>,
    cached: Mutex<Cached>,
}

impl ScheduleStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            cached: Mutex::new(Cached {
                hydrated: true,
                record: None,
            }),
        }
    }

    pub fn file_backed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cached: Mutex::new(Cached::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn save(&self, record: &ScheduleRecord) -> Result<()> {
        let mut cached = self.lock_cached();
        if let Some(path) = &self.path {
            write_json_atomic(path, record, "schedule")?;
        }
        cached.record = Some(record.clone());
        cached.hydrated = true;
        debug!("schedule record saved ({})", record.spec);
        Ok(())
    }

    pub fn load(&self) -> Option<ScheduleRecord> {
        let mut cached = self.lock_cached();
        if !cached.hydrated {
            cached.record = self
                .path
                .as_deref()
                .and_then(|path| read_json_file(path, "schedule"));
            cached.hydrated = true;
        }
        cached.record.clone()
    }

    pub fn clear(&self) -> Result<()> {
        let mut cached = self.lock_cached();
        if let Some(path) = &self.path {
            remove_file_if_present(path, "schedule")?;
        }
        cached.record = None;
        cached.hydrated = true;
        Ok(())
    }

    fn lock_cached(&self) -> std::sync::MutexGuard<'_, Cached> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}
