//! In-process platform implementations.
//!
//! Wake-ups are tokio sleeps whose fires are sent on an mpsc channel, the
//! status surface logs and remembers what it shows, and restart requests
//! are forwarded on a channel to the dispatch loop.

use super::{
    ChannelSpec, Clock, ElevationHandle, Platform, ProcessElevator, RestartRequester,
    StatusSurface, WakeTimer,
};
use crate::error::{Result, RunnerError};
use crate::options::TaskOptions;
use crate::permissions::SharedPermissionStore;
use crate::presenter::StatusContent;
use crate::recovery::RestartSignal;
use crate::scheduler::AlarmPayload;
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wake timer backed by spawned tokio sleeps.
pub struct TokioWakeTimer {
    runtime: tokio::runtime::Handle,
    fire_tx: mpsc::UnboundedSender<AlarmPayload>,
    armed: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioWakeTimer {
    pub fn new(runtime: tokio::runtime::Handle, fire_tx: mpsc::UnboundedSender<AlarmPayload>) -> Self {
        Self {
            runtime,
            fire_tx,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Bind to the runtime of the calling context.
    pub fn from_current(fire_tx: mpsc::UnboundedSender<AlarmPayload>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RunnerError::Timer(format!("no tokio runtime for wake timer: {e}")))?;
        Ok(Self::new(runtime, fire_tx))
    }

    /// Returns `true` while a wake-up for `identity` is pending.
    pub fn is_armed(&self, identity: &str) -> bool {
        let armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        armed.get(identity).is_some_and(|task| !task.is_finished())
    }
}

impl WakeTimer for TokioWakeTimer {
    fn arm_one_shot(&self, when_epoch_millis: i64, alarm: AlarmPayload) -> Result<()> {
        if self.fire_tx.is_closed() {
            return Err(RunnerError::Timer("wake fire channel closed".to_owned()));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let delay_ms = u64::try_from(when_epoch_millis.saturating_sub(now)).unwrap_or(0);
        let identity = alarm.identity.clone();
        let tx = self.fire_tx.clone();

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            debug!("wake-up '{}' fired", alarm.identity);
            if tx.send(alarm).is_err() {
                warn!("wake-up fired but dispatch loop is gone");
            }
        });

        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = armed.insert(identity.clone(), task) {
            previous.abort();
        }
        debug!("wake-up '{identity}' armed in {delay_ms} ms");
        Ok(())
    }

    fn cancel(&self, identity: &str) -> Result<()> {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = armed.remove(identity) {
            task.abort();
            debug!("wake-up '{identity}' cancelled");
        }
        Ok(())
    }
}

/// Elevator that grants every request and tracks live handles.
#[derive(Debug, Default)]
pub struct LocalElevator {
    active: Mutex<HashSet<ElevationHandle>>,
}

impl LocalElevator {
    /// Number of currently held elevations.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ProcessElevator for LocalElevator {
    fn elevate(&self, options: &TaskOptions) -> Result<ElevationHandle> {
        let handle = ElevationHandle::new(uuid::Uuid::new_v4().to_string());
        info!(
            "process elevated for '{}' ({handle})",
            options.title.as_deref().unwrap_or("untitled")
        );
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.clone());
        Ok(handle)
    }

    fn release(&self, handle: &ElevationHandle) {
        let removed = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handle);
        if removed {
            info!("process elevation released ({handle})");
        }
    }
}

/// Status surface that logs and keeps the last content per indicator id.
#[derive(Debug, Default)]
pub struct LoggingSurface {
    channels: Mutex<Vec<ChannelSpec>>,
    shown: Mutex<HashMap<u32, StatusContent>>,
}

impl LoggingSurface {
    /// Content currently shown under `id`.
    pub fn shown(&self, id: u32) -> Option<StatusContent> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Number of visible indicators.
    pub fn visible_count(&self) -> usize {
        self.shown.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Registered channels.
    pub fn channels(&self) -> Vec<ChannelSpec> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StatusSurface for LoggingSurface {
    fn create_channel(&self, channel: &ChannelSpec) -> anyhow::Result<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if !channels.iter().any(|c| c.id == channel.id) {
            debug!("status channel '{}' created", channel.id);
            channels.push(channel.clone());
        }
        Ok(())
    }

    fn notify(&self, id: u32, content: &StatusContent) -> anyhow::Result<()> {
        info!("status [{id}] {}: {}", content.title, content.description);
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, content.clone());
        Ok(())
    }

    fn cancel(&self, id: u32) {
        if self
            .shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
        {
            info!("status [{id}] removed");
        }
    }
}

/// Forwards restart requests to the dispatch loop.
pub struct ChannelRestartRequester {
    tx: mpsc::UnboundedSender<RestartSignal>,
}

impl ChannelRestartRequester {
    pub fn new(tx: mpsc::UnboundedSender<RestartSignal>) -> Self {
        Self { tx }
    }
}

impl RestartRequester for ChannelRestartRequester {
    fn request_restart(&self, signal: RestartSignal) -> anyhow::Result<()> {
        self.tx
            .send(signal)
            .map_err(|_| anyhow::anyhow!("restart channel closed"))
    }
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Wire a fully in-process [`Platform`] on the current tokio runtime.
///
/// Wake fires arrive on `fire_tx`, restart requests on `restart_tx`.
pub fn platform(
    permissions: SharedPermissionStore,
    fire_tx: mpsc::UnboundedSender<AlarmPayload>,
    restart_tx: mpsc::UnboundedSender<RestartSignal>,
) -> Result<Platform> {
    Ok(Platform {
        permissions,
        wake_timer: Arc::new(TokioWakeTimer::from_current(fire_tx)?),
        elevator: Arc::new(LocalElevator::default()),
        surface: Arc::new(LoggingSurface::default()),
        restart: Arc::new(ChannelRestartRequester::new(restart_tx)),
        clock: Arc::new(SystemClock),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::ScheduleSpec;

    fn payload(identity: &str) -> AlarmPayload {
        AlarmPayload {
            identity: identity.to_owned(),
            spec: ScheduleSpec::new(9, 0).unwrap(),
            options: TaskOptions::new("A"),
        }
    }

    #[tokio::test]
    async fn past_deadline_fires_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = TokioWakeTimer::from_current(tx).unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        timer.arm_one_shot(now - 1_000, payload("daily")).unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("fire within timeout")
            .expect("channel open");
        assert_eq!(fired.identity, "daily");
    }

    #[tokio::test]
    async fn rearm_replaces_previous_wakeup() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = TokioWakeTimer::from_current(tx).unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        let mut first = payload("daily");
        first.options = TaskOptions::new("first");
        timer.arm_one_shot(now + 60_000, first).unwrap();

        let mut second = payload("daily");
        second.options = TaskOptions::new("second");
        timer.arm_one_shot(now, second).unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.options.title.as_deref(), Some("second"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_prevents_fire_and_tolerates_unknown_identity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = TokioWakeTimer::from_current(tx).unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        timer.arm_one_shot(now + 200, payload("daily")).unwrap();
        assert!(timer.is_armed("daily"));
        timer.cancel("daily").unwrap();
        timer.cancel("never-armed").unwrap();
        assert!(!timer.is_armed("daily"));

        let result = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
        assert!(result.is_err(), "cancelled wake-up must not fire");
    }

    #[test]
    fn arm_fails_when_fire_channel_closed() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let timer = TokioWakeTimer::new(rt.handle().clone(), tx);
        let err = timer.arm_one_shot(0, payload("daily")).unwrap_err();
        assert!(matches!(err, RunnerError::Timer(_)));
    }

    #[test]
    fn from_current_without_runtime_is_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(TokioWakeTimer::from_current(tx).is_err());
    }

    #[test]
    fn local_elevator_tracks_handles() {
        let elevator = LocalElevator::default();
        let handle = elevator.elevate(&TaskOptions::new("A")).unwrap();
        assert_eq!(elevator.active_count(), 1);
        elevator.release(&handle);
        elevator.release(&handle);
        assert_eq!(elevator.active_count(), 0);
    }

    #[test]
    fn logging_surface_replaces_content_per_id() {
        let surface = LoggingSurface::default();
        let mut content = StatusContent::placeholder("A", "a");
        surface.notify(1, &content).unwrap();
        content.title = "B".to_owned();
        surface.notify(1, &content).unwrap();
        assert_eq!(surface.visible_count(), 1);
        assert_eq!(surface.shown(1).unwrap().title, "B");
        surface.cancel(1);
        assert_eq!(surface.visible_count(), 0);
    }

    #[test]
    fn channel_restart_requester_forwards_signal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let requester = ChannelRestartRequester::new(tx);
        requester
            .request_restart(RestartSignal::RestartRequested)
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), RestartSignal::RestartRequested);
    }
}
