//! Relaunching an in-flight task after the process dies.

use crate::helpers::{Harness, june_morning};
use bgrunner::testing::{RecordingConsumer, local_time};
use bgrunner::{RestartSignal, RunnerState, StartOutcome, StatusUpdate, TaskOptions};
use serde_json::json;
use std::sync::Arc;

#[test]
fn running_task_is_recovered_after_restart() {
    let h = Harness::at(june_morning());
    h.bg.start(TaskOptions::new("Sync").with_parameters(json!({ "batch": 3 })))
        .unwrap();

    let h = h.restarted(june_morning());
    assert_eq!(h.bg.state(), RunnerState::Idle);
    assert_eq!(h.bg.recover_on_launch().unwrap(), StartOutcome::Started);
    assert_eq!(h.bg.current_status().unwrap().title, "Sync");
    assert_eq!(h.fakes.surface.visible_count(), 1);

    let consumer = Arc::new(RecordingConsumer::new());
    assert_eq!(h.bg.attach_consumer(&consumer), 1);
    assert_eq!(consumer.events()[0].parameters, json!({ "batch": 3 }));
}

#[test]
fn stopped_task_is_not_recovered() {
    let h = Harness::at(june_morning());
    h.bg.start(TaskOptions::new("Sync")).unwrap();
    h.bg.stop().unwrap();

    let h = h.restarted(june_morning());
    assert_eq!(
        h.bg.handle_restart_signal(RestartSignal::PackageReplaced).unwrap(),
        StartOutcome::NothingToRecover
    );
    assert_eq!(h.fakes.elevator.elevations(), 0);
    assert!(h.bg.current_status().is_none());
}

#[test]
fn armed_schedule_alone_is_not_a_running_task() {
    let h = Harness::at(june_morning());
    h.bg.schedule_daily(9, 0, &TaskOptions::new("daily")).unwrap();

    let h = h.restarted(june_morning());
    assert_eq!(
        h.bg.recover_on_launch().unwrap(),
        StartOutcome::NothingToRecover
    );
    assert_eq!(h.fakes.elevator.elevations(), 0);
    assert!(h.bg.current_status().is_none());
    assert_eq!(h.bg.state(), RunnerState::Idle);
}

#[test]
fn daily_schedule_is_rearmed_after_restart() {
    let h = Harness::at(june_morning());
    h.bg.schedule_daily(9, 0, &TaskOptions::new("daily")).unwrap();

    let h = h.restarted(local_time(2026, 6, 10, 12, 0));
    assert!(h.fakes.timer.arms().is_empty());
    h.bg.recover_on_launch().unwrap();

    let next = local_time(2026, 6, 11, 9, 0);
    assert_eq!(h.bg.scheduler().next_fire(), Some(next));
    let (when, payload) = h.fakes.timer.last_arm().unwrap();
    assert_eq!(when, next.timestamp_millis());
    assert_eq!(payload.options.title.as_deref(), Some("daily"));

    h.fakes.clock.set(next);
    assert_eq!(h.bg.handle_fire(payload).start.unwrap(), StartOutcome::Started);
}

#[test]
fn cancelled_schedule_is_not_rearmed_after_restart() {
    let h = Harness::at(june_morning());
    h.bg.schedule_daily(9, 0, &TaskOptions::new("daily")).unwrap();
    assert!(h.bg.cancel_schedule().unwrap());

    let h = h.restarted(june_morning());
    h.bg.recover_on_launch().unwrap();
    assert!(h.fakes.timer.arms().is_empty());
    assert!(h.bg.scheduler().next_fire().is_none());
}

#[test]
fn persisted_status_update_survives_restart() {
    let h = Harness::at(june_morning());
    h.bg.start(TaskOptions::new("Sync").with_description("starting"))
        .unwrap();
    h.bg.update_status_and_persist(&StatusUpdate::description("step 2 of 5"))
        .unwrap();

    let h = h.restarted(june_morning());
    h.bg.recover_on_launch().unwrap();
    assert_eq!(h.bg.current_status().unwrap().description, "step 2 of 5");
}

#[test]
fn reclaim_requests_restart_and_signal_is_idempotent_while_running() {
    let h = Harness::at(june_morning());
    assert!(!h.bg.on_reclaim().unwrap());

    h.bg.start(TaskOptions::new("Sync")).unwrap();
    assert!(h.bg.on_reclaim().unwrap());
    assert_eq!(
        h.fakes.restarts.signals(),
        vec![RestartSignal::RestartRequested]
    );

    assert_eq!(
        h.bg.handle_restart_signal(RestartSignal::RestartRequested)
            .unwrap(),
        StartOutcome::AlreadyRunning
    );
    assert_eq!(h.fakes.elevator.elevations(), 1);
}

#[test]
fn action_strings_route_to_recovery() {
    let h = Harness::at(june_morning());
    h.bg.store().save(&TaskOptions::new("stored")).unwrap();

    assert_eq!(h.bg.handle_restart_action("SCREEN_ON").unwrap(), None);
    assert_eq!(h.fakes.elevator.elevations(), 0);

    assert_eq!(
        h.bg.handle_restart_action("boot_completed").unwrap(),
        Some(StartOutcome::Started)
    );
}
