//! Configuration types for the background runner.

use crate::error::{Result, RunnerError};
use crate::permissions::{PermissionKind, PermissionStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Status indicator channel and defaults.
    pub notification: NotificationConfig,
    /// Recurring schedule settings.
    pub schedule: ScheduleConfig,
    /// Consumer (task body) settings.
    pub consumer: ConsumerConfig,
    /// Option store settings.
    pub storage: StorageConfig,
    /// Capability grants. Status and exact-alarm are granted by default.
    pub permissions: PermissionStore,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            notification: NotificationConfig::default(),
            schedule: ScheduleConfig::default(),
            consumer: ConsumerConfig::default(),
            storage: StorageConfig::default(),
            permissions: PermissionStore::with_granted(&[
                PermissionKind::Notifications,
                PermissionKind::ExactAlarm,
            ]),
        }
    }
}

/// Status channel, indicator id and fallback content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Channel identifier registered with the status surface.
    pub channel_id: String,
    /// Human-readable channel name.
    pub channel_name: String,
    /// Channel description.
    pub channel_description: String,
    /// Well-known id of the single status indicator.
    pub notification_id: u32,
    /// Title used when options carry none.
    pub default_title: String,
    /// Description used when options carry none.
    pub default_description: String,
    /// Icon used when options carry none or name an empty icon.
    pub default_icon: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_id: "background_runner_channel".to_owned(),
            channel_name: "Background Runner".to_owned(),
            channel_description: "Background service notifications".to_owned(),
            notification_id: 10001,
            default_title: "Background Task".to_owned(),
            default_description: "Running...".to_owned(),
            default_icon: "ic_popup_sync".to_owned(),
        }
    }
}

/// Recurring schedule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Recurrence identity used to replace or cancel the armed wake-up.
    pub identity: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            identity: "bgrunner.daily".to_owned(),
        }
    }
}

/// Consumer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Upper bound a host imposes on a single consumer run, in milliseconds.
    pub headless_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            headless_timeout_ms: 60_000,
        }
    }
}

/// Option store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Options file. `None` uses [`crate::runner_dirs::options_file`].
    pub options_path: Option<PathBuf>,
    /// Armed schedule record. `None` uses [`crate::runner_dirs::schedule_file`].
    pub schedule_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved options file path.
    pub fn effective_options_path(&self) -> PathBuf {
        self.options_path
            .clone()
            .unwrap_or_else(crate::runner_dirs::options_file)
    }

    pub fn effective_schedule_path(&self) -> PathBuf {
        self.schedule_path
            .clone()
            .unwrap_or_else(crate::runner_dirs::schedule_file)
    }
}

impl RunnerConfig {
    /// Parse `path` as TOML. Sections and keys it omits keep their defaults.
    ///
    /// # Errors
    ///
    /// `Io` when the file is unreadable, `Config` when it is not valid TOML
    /// for this shape.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| RunnerError::Config(format!("{}: {e}", path.display())))
    }

    /// Write the config as TOML, replacing `path` atomically.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| RunnerError::Config(e.to_string()))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let staging = path.with_extension("toml.tmp");
        std::fs::write(&staging, text)?;
        std::fs::rename(&staging, path)?;
        Ok(())
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults. A present but malformed file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::metadata(path) {
            Ok(_) => Self::from_file(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn default_config_path() -> PathBuf {
        crate::runner_dirs::config_file()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RunnerConfig::default();
        assert_eq!(config.notification.notification_id, 10001);
        assert_eq!(config.notification.channel_id, "background_runner_channel");
        assert!(!config.schedule.identity.is_empty());
        assert_eq!(config.consumer.headless_timeout_ms, 60_000);
        assert!(config.storage.options_path.is_none());
        assert!(config.permissions.is_granted(PermissionKind::Notifications));
        assert!(config.permissions.is_granted(PermissionKind::ExactAlarm));
        assert!(!config.permissions.is_granted(PermissionKind::IgnoreBatteryOptimizations));
    }

    #[test]
    fn saved_config_reads_back_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = RunnerConfig::default();
        config.notification.default_title = "Sync".to_owned();
        config.schedule.identity = "custom.daily".to_owned();
        config.storage.options_path = Some(dir.path().join("opts.json"));
        config.permissions.revoke(PermissionKind::ExactAlarm);

        config.save_to_file(&path).unwrap();
        let loaded = RunnerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: RunnerConfig = toml::from_str("[schedule]\nidentity = \"x\"\n").unwrap();
        assert_eq!(parsed.schedule.identity, "x");
        assert_eq!(parsed.notification, NotificationConfig::default());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RunnerConfig::from_file(Path::new("/nonexistent/bgrunner.toml")).unwrap_err();
        assert!(matches!(err, RunnerError::Io(_)));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[notification\nnotification_id = 1").unwrap();
        let err = RunnerConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, RunnerError::Config(_)));
    }

    #[test]
    fn load_or_default_without_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = RunnerConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(loaded, RunnerConfig::default());
    }

    #[test]
    fn effective_options_path_prefers_explicit() {
        let storage = StorageConfig {
            options_path: Some(PathBuf::from("/x/opts.json")),
            ..StorageConfig::default()
        };
        assert_eq!(storage.effective_options_path(), PathBuf::from("/x/opts.json"));
        assert_eq!(
            storage.effective_schedule_path(),
            crate::runner_dirs::schedule_file()
        );
    }

    #[test]
    fn default_path_is_the_managed_config_file() {
        assert_eq!(
            RunnerConfig::default_config_path(),
            crate::runner_dirs::config_file()
        );
    }
}
