//! Capabilities the runner needs from the OS, and who granted them.
//!
//! Grants live in `config.toml` under `[permissions]`:
//!
//! ```toml
//! [permissions]
//! notifications = true
//! exact_alarm = false
//! ```
//!
//! The host wraps the loaded [`PermissionStore`] in a
//! [`SharedPermissionStore`], which answers [`PermissionChecker`] queries
//! live, so a grant flipped at runtime is seen by the next start or arm.

use crate::platform::PermissionChecker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// One OS capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Showing the persistent status indicator.
    Notifications,
    /// Arming exact wall-clock wake-ups.
    ExactAlarm,
    /// Exemption from battery optimizations.
    IgnoreBatteryOptimizations,
}

impl PermissionKind {
    pub const ALL: [PermissionKind; 3] = [
        PermissionKind::Notifications,
        PermissionKind::ExactAlarm,
        PermissionKind::IgnoreBatteryOptimizations,
    ];

    fn key(self) -> &'static str {
        match self {
            PermissionKind::Notifications => "notifications",
            PermissionKind::ExactAlarm => "exact_alarm",
            PermissionKind::IgnoreBatteryOptimizations => "ignore_battery_optimizations",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission {0:?}")]
pub struct UnknownPermission(pub String);

impl FromStr for PermissionKind {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.key() == wanted)
            .ok_or_else(|| UnknownPermission(s.to_owned()))
    }
}

/// Grants shared between the host and every component that checks them.
pub type SharedPermissionStore = Arc<Mutex<PermissionStore>>;

/// Granted/revoked state per capability. Absent means not granted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionStore {
    grants: BTreeMap<PermissionKind, bool>,
}

impl PermissionStore {
    pub fn with_granted(kinds: &[PermissionKind]) -> Self {
        Self {
            grants: kinds.iter().map(|kind| (*kind, true)).collect(),
        }
    }

    #[must_use]
    pub fn into_shared(self) -> SharedPermissionStore {
        Arc::new(Mutex::new(self))
    }

    pub fn is_granted(&self, kind: PermissionKind) -> bool {
        self.grants.get(&kind).copied().unwrap_or(false)
    }

    pub fn grant(&mut self, kind: PermissionKind) {
        self.grants.insert(kind, true);
    }

    /// Record an explicit refusal (kept in the config, unlike a missing entry).
    pub fn revoke(&mut self, kind: PermissionKind) {
        self.grants.insert(kind, false);
    }

    /// Kinds currently granted, in declaration order.
    pub fn granted(&self) -> impl Iterator<Item = PermissionKind> + '_ {
        self.grants
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(kind, _)| *kind)
    }
}

impl PermissionChecker for Mutex<PermissionStore> {
    fn has_status_permission(&self) -> bool {
        is_granted(self, PermissionKind::Notifications)
    }

    fn has_exact_schedule_permission(&self) -> bool {
        is_granted(self, PermissionKind::ExactAlarm)
    }

    fn is_battery_optimization_ignored(&self) -> bool {
        is_granted(self, PermissionKind::IgnoreBatteryOptimizations)
    }
}

fn is_granted(store: &Mutex<PermissionStore>, kind: PermissionKind) -> bool {
    store
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .is_granted(kind)
}
