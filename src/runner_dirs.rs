//! Where the runner keeps its files.
//!
//! Roots come from [`dirs`] with a `bgrunner` subdirectory appended:
//!
//! | Root | macOS | Linux |
//! |------|-------|-------|
//! | data | `~/Library/Application Support/bgrunner/` | `~/.local/share/bgrunner/` |
//! | config | `~/Library/Application Support/bgrunner/` | `~/.config/bgrunner/` |
//!
//! `BGRUNNER_DATA_DIR` and `BGRUNNER_CONFIG_DIR` replace the respective
//! root outright (no subdirectory is appended). Tests and sandboxed hosts
//! use them to stay out of the user's home.

use std::path::PathBuf;

const APP_DIR: &str = "bgrunner";

fn resolve(env_key: &str, platform_root: Option<PathBuf>, scratch: &str) -> PathBuf {
    match std::env::var_os(env_key) {
        Some(explicit) => PathBuf::from(explicit),
        None => platform_root
            .map(|root| root.join(APP_DIR))
            .unwrap_or_else(|| std::env::temp_dir().join(scratch)),
    }
}

/// Root for persisted task options and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve("BGRUNNER_DATA_DIR", dirs::data_dir(), "bgrunner-data")
}

#[must_use]
pub fn config_dir() -> PathBuf {
    resolve("BGRUNNER_CONFIG_DIR", dirs::config_dir(), "bgrunner-config")
}

#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// `config.toml` inside [`config_dir`].
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// `options.json` inside [`data_dir`].
#[must_use]
pub fn options_file() -> PathBuf {
    data_dir().join("options.json")
}

/// `schedule.json` inside [`data_dir`].
#[must_use]
pub fn schedule_file() -> PathBuf {
    data_dir().join("schedule.json")
}
