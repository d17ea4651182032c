//! [`BackgroundRunner`]: the wired-up coordinator an application embeds.
//!
//! Owns the option store, presenter, event queue, scheduler, runner and
//! recovery listener, built once at process entry and shared by `Arc`.
//! [`BackgroundRunner::run_dispatch`] drives wake fires and restart
//! requests from the platform into the runner.

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::events::{DispatchConsumer, EventQueue, ExecuteConsumer};
use crate::options::{StatusUpdate, TaskOptions};
use crate::platform::Platform;
use crate::presenter::{StatusContent, StatusPresenter};
use crate::recovery::{RestartRecoveryListener, RestartSignal};
use crate::runner::{
    RunnerState, StartOutcome, StopOutcome, TaskRunner, Transition, Trigger, UpdateOutcome,
};
use crate::scheduler::{
    AlarmPayload, FireReport, RecurringScheduler, ScheduleSpec, ScheduleStore, SchedulerEvent,
};
use crate::store::OptionStore;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Background task coordinator.
pub struct BackgroundRunner {
    config: RunnerConfig,
    platform: Platform,
    store: Arc<OptionStore>,
    presenter: Arc<StatusPresenter>,
    queue: Arc<EventQueue>,
    router: Arc<DispatchConsumer>,
    scheduler: Arc<RecurringScheduler>,
    runner: Arc<TaskRunner>,
    recovery: RestartRecoveryListener,
}

impl BackgroundRunner {
    /// Wire every component over `platform`.
    ///
    /// `store` holds the options of an in-flight task; `schedules` holds the
    /// armed daily schedule. Scheduler status is published on
    /// `scheduler_events` when given.
    pub fn new(
        config: RunnerConfig,
        platform: Platform,
        store: Arc<OptionStore>,
        schedules: Arc<ScheduleStore>,
        scheduler_events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    ) -> Self {
        let presenter = Arc::new(StatusPresenter::new(
            Arc::clone(&platform.surface),
            config.notification.clone(),
        ));
        let queue = Arc::new(EventQueue::new());
        let router = Arc::new(DispatchConsumer::new());
        queue.attach(&router);

        let mut scheduler =
            RecurringScheduler::new(config.schedule.identity.clone(), &platform, schedules);
        if let Some(tx) = scheduler_events {
            scheduler = scheduler.with_events(tx);
        }
        let scheduler = Arc::new(scheduler);

        let runner = Arc::new(TaskRunner::new(
            &platform,
            Arc::clone(&store),
            Arc::clone(&presenter),
            Arc::clone(&queue),
            Arc::clone(&scheduler),
        ));
        let recovery = RestartRecoveryListener::new(
            Arc::clone(&store),
            Arc::clone(&runner),
            Arc::clone(&scheduler),
        );

        Self {
            config,
            platform,
            store,
            presenter,
            queue,
            router,
            scheduler,
            runner,
            recovery,
        }
    }

    /// Start the task now.
    pub fn start(&self, options: TaskOptions) -> Result<StartOutcome> {
        self.runner.handle(Trigger::Manual(options))
    }

    /// Stop the running task and cancel the recurrence. Attached
    /// consumers stay attached for the next run.
    pub fn stop(&self) -> Result<StopOutcome> {
        self.runner.stop()
    }

    pub fn update_status(&self, update: &StatusUpdate) -> UpdateOutcome {
        self.runner.update(update)
    }

    pub fn update_status_and_persist(&self, update: &StatusUpdate) -> Result<UpdateOutcome> {
        self.runner.update_and_persist(update)
    }

    /// Run the task every day at `hour:minute` local time.
    ///
    /// Returns the instant of the first fire.
    pub fn schedule_daily(
        &self,
        hour: u8,
        minute: u8,
        options: &TaskOptions,
    ) -> Result<DateTime<Local>> {
        let spec = ScheduleSpec::new(hour, minute)?;
        self.scheduler.arm(spec, options)
    }

    /// Returns `true` if a recurrence was armed.
    pub fn cancel_schedule(&self) -> Result<bool> {
        self.scheduler.cancel()
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    pub fn state(&self) -> RunnerState {
        self.runner.state()
    }

    /// Attach the consumer for this task run and flush parked events to it.
    ///
    /// Only a weak reference is kept. Returns the number of flushed events.
    pub fn attach_consumer<C: ExecuteConsumer + 'static>(&self, consumer: &Arc<C>) -> usize {
        self.router.set_active(consumer);
        self.queue.attach(&self.router)
    }

    pub fn detach_consumer(&self) {
        self.router.clear_active();
    }

    /// Register the consumer used when no active one is attached.
    pub fn set_default_consumer<C: ExecuteConsumer + 'static>(&self, consumer: &Arc<C>) -> usize {
        self.router.set_default(consumer);
        self.queue.attach(&self.router)
    }

    pub fn handle_fire(&self, payload: AlarmPayload) -> FireReport {
        self.scheduler.handle_fire(payload, &self.runner)
    }

    pub fn handle_restart_signal(&self, signal: RestartSignal) -> Result<StartOutcome> {
        self.recovery.on_signal(signal)
    }

    /// Handle a raw restart action string; unknown actions yield `None`.
    pub fn handle_restart_action(&self, action: &str) -> Result<Option<StartOutcome>> {
        self.recovery.on_action(action)
    }

    /// Re-arm the recorded schedule and resume a task that was running
    /// when the process last died.
    pub fn recover_on_launch(&self) -> Result<StartOutcome> {
        self.recovery.on_signal(RestartSignal::BootCompleted)
    }

    pub fn on_reclaim(&self) -> Result<bool> {
        self.runner.on_reclaim()
    }

    pub fn is_battery_optimization_ignored(&self) -> bool {
        self.platform.permissions.is_battery_optimization_ignored()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.runner.subscribe()
    }

    /// Content of the visible status indicator.
    pub fn current_status(&self) -> Option<StatusContent> {
        self.presenter.current()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<OptionStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<RecurringScheduler> {
        &self.scheduler
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    /// Drive wake fires and restart requests into the runner until
    /// `cancel` fires or both channels close.
    pub fn run_dispatch(
        self: Arc<Self>,
        mut fire_rx: mpsc::UnboundedReceiver<AlarmPayload>,
        mut restart_rx: mpsc::UnboundedReceiver<RestartSignal>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("dispatch loop started");
            let mut fires_open = true;
            let mut restarts_open = true;
            while fires_open || restarts_open {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("dispatch loop cancelled");
                        break;
                    }
                    fire = fire_rx.recv(), if fires_open => match fire {
                        Some(payload) => {
                            let report = self.handle_fire(payload);
                            if report.next_fire.is_none() {
                                warn!("recurring task not re-armed");
                            }
                        }
                        None => fires_open = false,
                    },
                    signal = restart_rx.recv(), if restarts_open => match signal {
                        Some(signal) => {
                            if let Err(e) = self.handle_restart_signal(signal) {
                                warn!("restart recovery failed: {e}");
                            }
                        }
                        None => restarts_open = false,
                    },
                }
            }
            info!("dispatch loop stopped");
        })
    }
}
