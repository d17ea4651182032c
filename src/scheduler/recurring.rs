//! The single recurring daily wake-up.
//!
//! Arming hands one wake-up to the platform [`WakeTimer`] under a fixed
//! recurrence identity, so re-arming replaces rather than accumulates, and
//! then records the schedule in the [`ScheduleStore`]. Wake-ups may not
//! outlive the process; [`RecurringScheduler::restore`] re-arms from that
//! record on launch. Every fire starts the task and then re-arms for the
//! following day, whether or not the start succeeded.

use crate::error::{Result, RunnerError};
use crate::options::TaskOptions;
use crate::platform::{Clock, PermissionChecker, Platform, WakeTimer};
use crate::runner::{StartOutcome, TaskRunner, Trigger};
use crate::scheduler::{ScheduleRecord, ScheduleSpec, ScheduleStore};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What an armed wake-up carries back when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub identity: String,
    pub spec: ScheduleSpec,
    pub options: TaskOptions,
}

/// Scheduler status notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Armed {
        identity: String,
        next_fire: DateTime<Local>,
    },
    Fired {
        identity: String,
    },
    /// The follow-up wake-up could not be armed; the recurrence has stopped.
    RearmFailed {
        identity: String,
        error: String,
    },
    Cancelled {
        identity: String,
    },
}

/// Result of handling one fire.
#[derive(Debug)]
pub struct FireReport {
    pub start: Result<StartOutcome>,
    /// `None` when re-arming failed.
    pub next_fire: Option<DateTime<Local>>,
}

#[derive(Debug, Clone)]
struct ArmedSchedule {
    spec: ScheduleSpec,
    next_fire: DateTime<Local>,
}

/// Arms, re-arms and cancels the daily wake-up.
pub struct RecurringScheduler {
    identity: String,
    permissions: Arc<dyn PermissionChecker>,
    timer: Arc<dyn WakeTimer>,
    clock: Arc<dyn Clock>,
    records: Arc<ScheduleStore>,
    armed: Mutex<Option<ArmedSchedule>>,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl RecurringScheduler {
    pub fn new(
        identity: impl Into<String>,
        platform: &Platform,
        records: Arc<ScheduleStore>,
    ) -> Self {
        Self {
            identity: identity.into(),
            permissions: Arc::clone(&platform.permissions),
            timer: Arc::clone(&platform.wake_timer),
            clock: Arc::clone(&platform.clock),
            records,
            armed: Mutex::new(None),
            events: None,
        }
    }

    /// Publish [`SchedulerEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Arm the daily wake-up, replacing any previous one, and record it
    /// for [`restore`](Self::restore).
    ///
    /// Returns the instant of the first fire. Nothing is recorded when
    /// arming fails; when recording fails the fresh wake-up is cancelled.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if either the status or exact-schedule permission
    /// is missing; storage or timer errors otherwise.
    pub fn arm(&self, spec: ScheduleSpec, options: &TaskOptions) -> Result<DateTime<Local>> {
        self.check_permissions()?;
        let next_fire = spec.next_after(&self.clock.now())?;

        let mut armed = self.lock_armed();
        self.timer
            .arm_one_shot(next_fire.timestamp_millis(), self.payload(spec, options))?;
        let record = ScheduleRecord::new(self.identity.clone(), spec, options.clone());
        if let Err(e) = self.records.save(&record) {
            if let Err(cancel_err) = self.timer.cancel(&self.identity) {
                warn!("failed to withdraw unrecorded wake-up: {cancel_err}");
            }
            *armed = None;
            return Err(e);
        }
        *armed = Some(ArmedSchedule { spec, next_fire });
        drop(armed);

        info!("recurring task armed {spec}, first fire at {next_fire}");
        self.publish(SchedulerEvent::Armed {
            identity: self.identity.clone(),
            next_fire,
        });
        Ok(next_fire)
    }

    /// Re-arm the recorded schedule after a restart.
    ///
    /// Returns `None` when nothing is recorded or a schedule is already
    /// armed in this process.
    pub fn restore(&self) -> Result<Option<DateTime<Local>>> {
        if self.armed_spec().is_some() {
            return Ok(None);
        }
        let Some(record) = self.records.load() else {
            debug!("no recorded schedule to restore");
            return Ok(None);
        };
        if record.identity != self.identity {
            debug!(
                "restoring schedule recorded as '{}' under '{}'",
                record.identity, self.identity
            );
        }
        self.check_permissions()?;
        let next_fire = record.spec.next_after(&self.clock.now())?;

        let mut armed = self.lock_armed();
        self.timer.arm_one_shot(
            next_fire.timestamp_millis(),
            self.payload(record.spec, &record.options),
        )?;
        *armed = Some(ArmedSchedule {
            spec: record.spec,
            next_fire,
        });
        drop(armed);

        info!("recurring task restored {}, next fire at {next_fire}", record.spec);
        self.publish(SchedulerEvent::Armed {
            identity: self.identity.clone(),
            next_fire,
        });
        Ok(Some(next_fire))
    }

    /// Remove the armed wake-up and its record. Returns `true` if one was
    /// armed.
    pub fn cancel(&self) -> Result<bool> {
        let mut armed = self.lock_armed();
        self.timer.cancel(&self.identity)?;
        let was_armed = armed.take().is_some();
        drop(armed);
        self.records.clear()?;

        if was_armed {
            info!("recurring task '{}' cancelled", self.identity);
            self.publish(SchedulerEvent::Cancelled {
                identity: self.identity.clone(),
            });
        }
        Ok(was_armed)
    }

    /// Start the task for a fired wake-up, then arm the next day's.
    ///
    /// A failed start does not prevent re-arming. A failed re-arm is
    /// reported as [`SchedulerEvent::RearmFailed`] and not retried.
    pub fn handle_fire(&self, payload: AlarmPayload, runner: &TaskRunner) -> FireReport {
        if payload.identity != self.identity {
            debug!(
                "fire for '{}' handled by scheduler '{}'",
                payload.identity, self.identity
            );
        }
        info!("recurring task fired ({})", payload.spec);
        self.publish(SchedulerEvent::Fired {
            identity: payload.identity.clone(),
        });

        let start = runner.handle(Trigger::Alarm(payload.options.clone()));
        if let Err(e) = &start {
            error!("alarm-triggered start failed: {e}");
        }

        let next_fire = match self.rearm(&payload) {
            Ok(next) => Some(next),
            Err(e) => {
                warn!("failed to re-arm recurring task: {e}");
                self.publish(SchedulerEvent::RearmFailed {
                    identity: self.identity.clone(),
                    error: e.to_string(),
                });
                None
            }
        };

        FireReport { start, next_fire }
    }

    /// Schedule currently armed, if any.
    pub fn armed_spec(&self) -> Option<ScheduleSpec> {
        self.lock_armed().as_ref().map(|a| a.spec)
    }

    /// Instant of the next fire, if armed.
    pub fn next_fire(&self) -> Option<DateTime<Local>> {
        self.lock_armed().as_ref().map(|a| a.next_fire)
    }

    fn rearm(&self, payload: &AlarmPayload) -> Result<DateTime<Local>> {
        let next_fire = payload.spec.next_day_after(&self.clock.now())?;
        let mut armed = self.lock_armed();
        self.timer.arm_one_shot(
            next_fire.timestamp_millis(),
            self.payload(payload.spec, &payload.options),
        )?;
        *armed = Some(ArmedSchedule {
            spec: payload.spec,
            next_fire,
        });
        debug!("recurring task re-armed for {next_fire}");
        Ok(next_fire)
    }

    fn check_permissions(&self) -> Result<()> {
        if !self.permissions.has_status_permission() {
            return Err(RunnerError::PermissionDenied(
                "status indicator permission not granted".to_owned(),
            ));
        }
        if !self.permissions.has_exact_schedule_permission() {
            return Err(RunnerError::PermissionDenied(
                "exact schedule permission not granted".to_owned(),
            ));
        }
        Ok(())
    }

    fn payload(&self, spec: ScheduleSpec, options: &TaskOptions) -> AlarmPayload {
        AlarmPayload {
            identity: self.identity.clone(),
            spec,
            options: options.clone(),
        }
    }

    fn publish(&self, event: SchedulerEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        if tx.send(event).is_err() {
            debug!("scheduler event receiver dropped");
        }
    }

    fn lock_armed(&self) -> std::sync::MutexGuard<'_, Option<ArmedSchedule>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }
}
