//! OS-facing collaborator abstractions.
//!
//! The coordinator never talks to the operating system directly. Wake
//! timers, process elevation, the status surface, restart requests,
//! permission checks and the wall clock are all injected through the traits
//! below. [`local`] provides in-process implementations built on tokio,
//! used by the host binary.

pub mod local;

use crate::error::Result;
use crate::options::TaskOptions;
use crate::presenter::StatusContent;
use crate::recovery::RestartSignal;
use crate::scheduler::AlarmPayload;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;

/// Authorization queries made before presenting status or arming a wake-up.
pub trait PermissionChecker: Send + Sync {
    /// May a persistent status indicator be shown?
    fn has_status_permission(&self) -> bool;

    /// May an exact wall-clock wake-up be armed?
    fn has_exact_schedule_permission(&self) -> bool;

    /// Is the process exempt from battery optimizations?
    fn is_battery_optimization_ignored(&self) -> bool {
        false
    }
}

/// One-shot wake-up facility keyed by recurrence identity.
pub trait WakeTimer: Send + Sync {
    /// Arm a wake-up at `when_epoch_millis`, replacing any wake-up already
    /// armed under `alarm.identity`.
    fn arm_one_shot(&self, when_epoch_millis: i64, alarm: AlarmPayload) -> Result<()>;

    /// Remove the wake-up armed under `identity`. No-op when none is armed.
    fn cancel(&self, identity: &str) -> Result<()>;
}

/// Opaque token for a protected execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElevationHandle(String);

impl ElevationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElevationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enters and leaves a protected, hard-to-reclaim execution context.
pub trait ProcessElevator: Send + Sync {
    /// Returns `PermissionDenied` or `ResourceUnavailable` when the OS refuses.
    fn elevate(&self, options: &TaskOptions) -> Result<ElevationHandle>;

    /// Leave the protected context. Unknown handles are ignored.
    fn release(&self, handle: &ElevationHandle);
}

/// Status channel registration data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Where the status indicator is actually drawn.
///
/// Failures here are cosmetic; callers log and continue.
pub trait StatusSurface: Send + Sync {
    fn create_channel(&self, channel: &ChannelSpec) -> anyhow::Result<()>;

    fn notify(&self, id: u32, content: &StatusContent) -> anyhow::Result<()>;

    fn cancel(&self, id: u32);
}

/// Asks the platform to relaunch the process after it is reclaimed.
pub trait RestartRequester: Send + Sync {
    fn request_restart(&self, signal: RestartSignal) -> anyhow::Result<()>;
}

/// Wall clock in the local timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The full set of OS collaborators, shared by every component.
#[derive(Clone)]
pub struct Platform {
    pub permissions: Arc<dyn PermissionChecker>,
    pub wake_timer: Arc<dyn WakeTimer>,
    pub elevator: Arc<dyn ProcessElevator>,
    pub surface: Arc<dyn StatusSurface>,
    pub restart: Arc<dyn RestartRequester>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
