//! Relaunching an in-flight task after the process restarts.
//!
//! Device boot, an application update, and an explicit restart request all
//! land here. A recorded daily schedule is re-armed first. Then, if the
//! option store still holds a configuration, the task was running when the
//! process died and is started again.

use crate::error::Result;
use crate::runner::{StartOutcome, TaskRunner, Trigger};
use crate::scheduler::RecurringScheduler;
use crate::store::OptionStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why the process was (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartSignal {
    BootCompleted,
    PackageReplaced,
    /// The runner asked to be relaunched after reclamation.
    RestartRequested,
}

impl RestartSignal {
    /// Action string for the explicit restart request.
    pub const RESTART_ACTION: &'static str = "bgrunner.RESTART";
}

impl fmt::Display for RestartSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BootCompleted => "boot_completed",
            Self::PackageReplaced => "package_replaced",
            Self::RestartRequested => Self::RESTART_ACTION,
        };
        f.write_str(s)
    }
}

/// Error returned for an action string that is not a restart signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignal(pub String);

impl fmt::Display for UnknownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a restart signal: {:?}", self.0)
    }
}

impl std::error::Error for UnknownSignal {}

impl FromStr for RestartSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "boot_completed" | "BOOT_COMPLETED" => Ok(Self::BootCompleted),
            "package_replaced" | "MY_PACKAGE_REPLACED" => Ok(Self::PackageReplaced),
            Self::RESTART_ACTION | "restart_requested" => Ok(Self::RestartRequested),
            other => Err(UnknownSignal(other.to_owned())),
        }
    }
}

/// Re-arms the recorded schedule and re-invokes the runner when a restart
/// signal arrives with options stored.
pub struct RestartRecoveryListener {
    store: Arc<OptionStore>,
    runner: Arc<TaskRunner>,
    scheduler: Arc<RecurringScheduler>,
}

impl RestartRecoveryListener {
    pub fn new(
        store: Arc<OptionStore>,
        runner: Arc<TaskRunner>,
        scheduler: Arc<RecurringScheduler>,
    ) -> Self {
        Self {
            store,
            runner,
            scheduler,
        }
    }

    /// A schedule that cannot be re-armed is logged and does not block task
    /// recovery.
    pub fn on_signal(&self, signal: RestartSignal) -> Result<StartOutcome> {
        match self.scheduler.restore() {
            Ok(Some(next_fire)) => info!("{signal}: daily schedule re-armed for {next_fire}"),
            Ok(None) => {}
            Err(e) => warn!("{signal}: cannot re-arm recorded schedule: {e}"),
        }

        if !self.store.has_options() {
            debug!("{signal}: no stored task, nothing to recover");
            return Ok(StartOutcome::NothingToRecover);
        }
        info!("{signal}: recovering stored task");
        self.runner.handle(Trigger::Recovery)
    }

    /// Parse `action` and handle it. Unrecognized actions are ignored.
    pub fn on_action(&self, action: &str) -> Result<Option<StartOutcome>> {
        match action.parse::<RestartSignal>() {
            Ok(signal) => self.on_signal(signal).map(Some),
            Err(e) => {
                debug!("{e}");
                Ok(None)
            }
        }
    }
}
