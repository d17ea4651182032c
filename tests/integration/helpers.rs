//! Shared helpers for integration tests.

use bgrunner::testing::{TestPlatform, local_time};
use bgrunner::{BackgroundRunner, OptionStore, RunnerConfig, ScheduleStore, SchedulerEvent};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A coordinator over fakes with file-backed option and schedule stores.
pub(crate) struct Harness {
    pub fakes: TestPlatform,
    pub bg: Arc<BackgroundRunner>,
    pub scheduler_events: mpsc::UnboundedReceiver<SchedulerEvent>,
    pub options_path: PathBuf,
    _dir: Option<tempfile::TempDir>,
}

impl Harness {
    /// Fresh harness whose clock reads `now`.
    pub(crate) fn at(now: DateTime<Local>) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let options_path = dir.path().join("options.json");
        let mut harness = Self::over(options_path, now);
        harness._dir = Some(dir);
        harness
    }

    /// Simulate a process restart: new platform (no wake-ups armed), new
    /// components, same options and schedule files. The temp dir moves to the new harness.
    pub(crate) fn restarted(mut self, now: DateTime<Local>) -> Self {
        let dir = self._dir.take();
        let mut harness = Self::over(self.options_path.clone(), now);
        harness._dir = dir;
        harness
    }

    fn over(options_path: PathBuf, now: DateTime<Local>) -> Self {
        let fakes = TestPlatform::new(now);
        let (tx, scheduler_events) = mpsc::unbounded_channel();
        let bg = Arc::new(BackgroundRunner::new(
            RunnerConfig::default(),
            fakes.platform(),
            Arc::new(OptionStore::file_backed(&options_path)),
            Arc::new(ScheduleStore::file_backed(schedule_path(&options_path))),
            Some(tx),
        ));
        Self {
            fakes,
            bg,
            scheduler_events,
            options_path,
            _dir: None,
        }
    }

    /// Scheduler events published so far.
    pub(crate) fn drain_scheduler_events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.scheduler_events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn schedule_path(options_path: &Path) -> PathBuf {
    options_path.with_file_name("schedule.json")
}

/// 08:00 on a June day, clear of any DST transition.
pub(crate) fn june_morning() -> DateTime<Local> {
    local_time(2026, 6, 10, 8, 0)
}
