//! Task lifecycle state machine.
//!
//! Every trigger (a manual start, a fired alarm, restart recovery) goes
//! through [`TaskRunner::handle`]. Transitions are serialized by one mutex:
//! concurrent starts collapse into a single elevation, and the losers see
//! [`StartOutcome::AlreadyRunning`].
//!
//! ```text
//! Idle --start--> Starting --elevated--> Running --stop--> Stopping --> Idle
//!                    |
//!                    +--permission/elevation failure--> Idle
//! ```

use crate::error::{Result, RunnerError};
use crate::events::{EmitOutcome, EventQueue};
use crate::options::{StatusUpdate, TaskOptions};
use crate::platform::{ElevationHandle, PermissionChecker, Platform, ProcessElevator, RestartRequester};
use crate::presenter::{StatusHandle, StatusPresenter};
use crate::recovery::RestartSignal;
use crate::scheduler::RecurringScheduler;
use crate::store::OptionStore;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the transition broadcast channel.
const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle state of the background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Why a start was requested.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Manual(TaskOptions),
    Alarm(TaskOptions),
    /// Relaunch with whatever options the store holds.
    Recovery,
}

impl Trigger {
    fn label(&self) -> &'static str {
        match self {
            Self::Manual(_) => "manual",
            Self::Alarm(_) => "alarm",
            Self::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// Recovery found no stored options.
    NothingToRecover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Updated,
    NoActiveTask,
}

/// A state change, as broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: RunnerState,
    pub to: RunnerState,
}

#[derive(Debug)]
struct RunnerInner {
    state: RunnerState,
    elevation: Option<ElevationHandle>,
    status: Option<StatusHandle>,
}

/// Turns triggers into a running task and tears it down again.
pub struct TaskRunner {
    store: Arc<OptionStore>,
    presenter: Arc<StatusPresenter>,
    queue: Arc<EventQueue>,
    scheduler: Arc<RecurringScheduler>,
    permissions: Arc<dyn PermissionChecker>,
    elevator: Arc<dyn ProcessElevator>,
    restart: Arc<dyn RestartRequester>,
    inner: Mutex<RunnerInner>,
    transitions: broadcast::Sender<Transition>,
}

impl TaskRunner {
    pub fn new(
        platform: &Platform,
        store: Arc<OptionStore>,
        presenter: Arc<StatusPresenter>,
        queue: Arc<EventQueue>,
        scheduler: Arc<RecurringScheduler>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            store,
            presenter,
            queue,
            scheduler,
            permissions: Arc::clone(&platform.permissions),
            elevator: Arc::clone(&platform.elevator),
            restart: Arc::clone(&platform.restart),
            inner: Mutex::new(RunnerInner {
                state: RunnerState::Idle,
                elevation: None,
                status: None,
            }),
            transitions,
        }
    }

    /// Start the task for `trigger` unless one is already in flight.
    ///
    /// On success the execute event is emitted after the state lock is
    /// released, so a consumer may query the runner from its delivery.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without the status permission; elevation and
    /// storage failures propagate. The runner is back in `Idle` on error.
    pub fn handle(&self, trigger: Trigger) -> Result<StartOutcome> {
        let label = trigger.label();
        let options = match trigger {
            Trigger::Manual(options) | Trigger::Alarm(options) => options,
            Trigger::Recovery => match self.store.load() {
                Some(options) => options,
                None => {
                    debug!("recovery requested with empty option store");
                    return Ok(StartOutcome::NothingToRecover);
                }
            },
        };

        let mut inner = self.lock_inner();
        if inner.state != RunnerState::Idle {
            debug!("{label} start ignored, task is {}", inner.state);
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.transition(&mut inner, RunnerState::Starting);

        if let Err(e) = self.begin(&mut inner, &options) {
            self.transition(&mut inner, RunnerState::Idle);
            warn!("{label} start failed: {e}");
            return Err(e);
        }
        self.transition(&mut inner, RunnerState::Running);
        drop(inner);

        info!("background task started ({label})");
        if self.queue.emit(options.execute_event()) == EmitOutcome::Queued {
            debug!("no consumer attached, execute event parked");
        }
        Ok(StartOutcome::Started)
    }

    fn begin(&self, inner: &mut RunnerInner, options: &TaskOptions) -> Result<()> {
        if !self.permissions.has_status_permission() {
            return Err(RunnerError::PermissionDenied(
                "status indicator permission not granted".to_owned(),
            ));
        }
        self.store.save(options)?;
        self.presenter.ensure_channel();
        let status = self.presenter.present(options);

        match self.elevator.elevate(options) {
            Ok(elevation) => {
                inner.elevation = Some(elevation);
                inner.status = Some(status);
                Ok(())
            }
            Err(e) => {
                self.presenter.clear(status);
                Err(e)
            }
        }
    }

    /// Tear the running task down and cancel the recurring wake-up.
    ///
    /// Teardown always completes; the first storage or timer error is
    /// reported afterwards.
    pub fn stop(&self) -> Result<StopOutcome> {
        let mut inner = self.lock_inner();
        if inner.state == RunnerState::Idle {
            debug!("stop ignored, no task running");
            return Ok(StopOutcome::NotRunning);
        }
        self.transition(&mut inner, RunnerState::Stopping);

        let cleared = self.store.clear();
        if let Some(status) = inner.status.take() {
            self.presenter.clear(status);
        }
        if let Some(elevation) = inner.elevation.take() {
            self.elevator.release(&elevation);
        }
        let cancelled = self.scheduler.cancel();

        self.transition(&mut inner, RunnerState::Idle);
        drop(inner);
        info!("background task stopped");

        cleared?;
        cancelled?;
        Ok(StopOutcome::Stopped)
    }

    /// Mutate the visible status of the running task.
    pub fn update(&self, update: &StatusUpdate) -> UpdateOutcome {
        let mut inner = self.lock_inner();
        if inner.state != RunnerState::Running {
            return UpdateOutcome::NoActiveTask;
        }
        inner.status = Some(self.presenter.update(inner.status, update));
        UpdateOutcome::Updated
    }

    /// Like [`Self::update`], and also merge the fields into the stored
    /// options so a recovered task shows them.
    pub fn update_and_persist(&self, update: &StatusUpdate) -> Result<UpdateOutcome> {
        let mut inner = self.lock_inner();
        if inner.state != RunnerState::Running {
            return Ok(UpdateOutcome::NoActiveTask);
        }
        inner.status = Some(self.presenter.update(inner.status, update));

        let mut options = self.store.load().unwrap_or_default();
        options.merge(update);
        self.store.save(&options)?;
        Ok(UpdateOutcome::Updated)
    }

    /// The platform is about to reclaim the process. Returns `true` if a
    /// relaunch was requested for the running task.
    pub fn on_reclaim(&self) -> Result<bool> {
        let inner = self.lock_inner();
        if inner.state != RunnerState::Running {
            return Ok(false);
        }
        self.restart
            .request_restart(RestartSignal::RestartRequested)
            .map_err(|e| RunnerError::ResourceUnavailable(format!("restart request failed: {e:#}")))?;
        info!("process reclaimed while running, relaunch requested");
        Ok(true)
    }

    pub fn state(&self) -> RunnerState {
        self.lock_inner().state
    }

    /// `true` while starting or running.
    pub fn is_running(&self) -> bool {
        matches!(
            self.lock_inner().state,
            RunnerState::Starting | RunnerState::Running
        )
    }

    /// Receive every subsequent state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    fn transition(&self, inner: &mut RunnerInner, to: RunnerState) {
        let from = inner.state;
        inner.state = to;
        debug!("runner {from} -> {to}");
        // No subscribers is fine.
        let _ = self.transitions.send(Transition { from, to });
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, RunnerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
