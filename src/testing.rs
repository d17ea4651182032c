//! Deterministic platform fakes shared by unit and integration tests.

#![allow(clippy::expect_used)]

use crate::error::{Result, RunnerError};
use crate::events::ExecuteConsumer;
use crate::options::{ExecuteEvent, TaskOptions};
use crate::platform::local::LoggingSurface;
use crate::platform::{
    Clock, ElevationHandle, PermissionChecker, Platform, ProcessElevator, RestartRequester,
    WakeTimer,
};
use crate::recovery::RestartSignal;
use crate::scheduler::AlarmPayload;
use chrono::{DateTime, Local, TimeZone};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A local wall-clock instant. Panics on times that do not exist locally.
pub fn local_time(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .earliest()
        .expect("representable local time")
}

/// Records every arm and cancel instead of sleeping.
#[derive(Debug, Default)]
pub struct FakeWakeTimer {
    arms: Mutex<Vec<(i64, AlarmPayload)>>,
    cancels: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl FakeWakeTimer {
    /// Make subsequent arms fail with a timer error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn arms(&self) -> Vec<(i64, AlarmPayload)> {
        self.arms.lock().expect("arms lock").clone()
    }

    pub fn last_arm(&self) -> Option<(i64, AlarmPayload)> {
        self.arms.lock().expect("arms lock").last().cloned()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().expect("cancels lock").clone()
    }
}

impl WakeTimer for FakeWakeTimer {
    fn arm_one_shot(&self, when_epoch_millis: i64, alarm: AlarmPayload) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RunnerError::Timer("wake timer unavailable".to_owned()));
        }
        self.arms
            .lock()
            .expect("arms lock")
            .push((when_epoch_millis, alarm));
        Ok(())
    }

    fn cancel(&self, identity: &str) -> Result<()> {
        self.cancels
            .lock()
            .expect("cancels lock")
            .push(identity.to_owned());
        Ok(())
    }
}

/// Counts elevations; can be made to fail or to dawdle.
#[derive(Debug, Default)]
pub struct CountingElevator {
    elevations: AtomicUsize,
    releases: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Duration>,
}

impl CountingElevator {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Block inside every `elevate` for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = delay;
    }

    /// Successful elevations so far.
    pub fn elevations(&self) -> usize {
        self.elevations.load(Ordering::SeqCst)
    }

    /// Elevations not yet released.
    pub fn active(&self) -> usize {
        self.elevations() - self.releases.load(Ordering::SeqCst)
    }
}

impl ProcessElevator for CountingElevator {
    fn elevate(&self, _options: &TaskOptions) -> Result<ElevationHandle> {
        let delay = *self.delay.lock().expect("delay lock");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RunnerError::ResourceUnavailable(
                "foreground execution refused".to_owned(),
            ));
        }
        let n = self.elevations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ElevationHandle::new(format!("elevation-{n}")))
    }

    fn release(&self, _handle: &ElevationHandle) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().expect("clock lock")
    }
}

/// Permission answers flipped by the test.
#[derive(Debug)]
pub struct StaticPermissions {
    status: AtomicBool,
    exact: AtomicBool,
    battery: AtomicBool,
}

impl StaticPermissions {
    /// Status and exact-schedule granted, battery optimizations active.
    pub fn granted() -> Self {
        Self {
            status: AtomicBool::new(true),
            exact: AtomicBool::new(true),
            battery: AtomicBool::new(false),
        }
    }

    pub fn set_status(&self, granted: bool) {
        self.status.store(granted, Ordering::SeqCst);
    }

    pub fn set_exact(&self, granted: bool) {
        self.exact.store(granted, Ordering::SeqCst);
    }

    pub fn set_battery_ignored(&self, ignored: bool) {
        self.battery.store(ignored, Ordering::SeqCst);
    }
}

impl PermissionChecker for StaticPermissions {
    fn has_status_permission(&self) -> bool {
        self.status.load(Ordering::SeqCst)
    }

    fn has_exact_schedule_permission(&self) -> bool {
        self.exact.load(Ordering::SeqCst)
    }

    fn is_battery_optimization_ignored(&self) -> bool {
        self.battery.load(Ordering::SeqCst)
    }
}

/// Remembers restart requests.
#[derive(Debug, Default)]
pub struct RecordingRestarts {
    signals: Mutex<Vec<RestartSignal>>,
}

impl RecordingRestarts {
    pub fn signals(&self) -> Vec<RestartSignal> {
        self.signals.lock().expect("signals lock").clone()
    }
}

impl RestartRequester for RecordingRestarts {
    fn request_restart(&self, signal: RestartSignal) -> anyhow::Result<()> {
        self.signals.lock().expect("signals lock").push(signal);
        Ok(())
    }
}

/// Consumer that records what it receives, optionally rejecting some events.
#[derive(Default)]
pub struct RecordingConsumer {
    events: Mutex<Vec<ExecuteEvent>>,
    reject: Option<Box<dyn Fn(&ExecuteEvent) -> bool + Send + Sync>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject (with an error) every event matching `predicate`.
    pub fn rejecting(predicate: impl Fn(&ExecuteEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            events: Mutex::default(),
            reject: Some(Box::new(predicate)),
        }
    }

    pub fn events(&self) -> Vec<ExecuteEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("events lock").len()
    }
}

impl ExecuteConsumer for RecordingConsumer {
    fn deliver(&self, event: &ExecuteEvent) -> anyhow::Result<()> {
        if self.reject.as_ref().is_some_and(|reject| reject(event)) {
            anyhow::bail!("event rejected by test consumer");
        }
        self.events.lock().expect("events lock").push(event.clone());
        Ok(())
    }
}

/// Every fake wired together, with typed access to each.
pub struct TestPlatform {
    pub permissions: Arc<StaticPermissions>,
    pub timer: Arc<FakeWakeTimer>,
    pub elevator: Arc<CountingElevator>,
    pub surface: Arc<LoggingSurface>,
    pub restarts: Arc<RecordingRestarts>,
    pub clock: Arc<FixedClock>,
}

impl TestPlatform {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            permissions: Arc::new(StaticPermissions::granted()),
            timer: Arc::new(FakeWakeTimer::default()),
            elevator: Arc::new(CountingElevator::default()),
            surface: Arc::new(LoggingSurface::default()),
            restarts: Arc::new(RecordingRestarts::default()),
            clock: Arc::new(FixedClock::new(now)),
        }
    }

    /// A [`Platform`] view over these fakes.
    pub fn platform(&self) -> Platform {
        Platform {
            permissions: self.permissions.clone(),
            wake_timer: self.timer.clone(),
            elevator: self.elevator.clone(),
            surface: self.surface.clone(),
            restart: self.restarts.clone(),
            clock: self.clock.clone(),
        }
    }
}
