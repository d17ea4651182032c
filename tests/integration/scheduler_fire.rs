//! Daily schedule arming, firing and re-arming through the coordinator.

use crate::helpers::{Harness, june_morning};
use bgrunner::testing::{RecordingConsumer, local_time};
use bgrunner::{RunnerError, RunnerState, SchedulerEvent, StartOutcome, TaskOptions};
use serde_json::json;
use std::sync::Arc;

#[test]
fn armed_at_eight_fires_at_nine_and_rearms_for_tomorrow() {
    let mut h = Harness::at(june_morning());
    let options = TaskOptions::new("A").with_parameters(json!({ "k": "v" }));

    let first = h.bg.schedule_daily(9, 0, &options).unwrap();
    assert_eq!(first, local_time(2026, 6, 10, 9, 0));
    let (when, payload) = h.fakes.timer.last_arm().unwrap();
    assert_eq!(when, first.timestamp_millis());

    h.fakes.clock.set(local_time(2026, 6, 10, 9, 0));
    let report = h.bg.handle_fire(payload);

    assert_eq!(report.start.unwrap(), StartOutcome::Started);
    assert_eq!(h.bg.state(), RunnerState::Running);
    assert_eq!(h.bg.store().load().unwrap(), options);
    assert_eq!(report.next_fire, Some(local_time(2026, 6, 11, 9, 0)));
    let (when, _) = h.fakes.timer.last_arm().unwrap();
    assert_eq!(when, local_time(2026, 6, 11, 9, 0).timestamp_millis());

    let consumer = Arc::new(RecordingConsumer::new());
    assert_eq!(h.bg.attach_consumer(&consumer), 1);
    assert_eq!(consumer.events()[0].parameters, json!({ "k": "v" }));

    let events = h.drain_scheduler_events();
    assert!(matches!(events[0], SchedulerEvent::Armed { .. }));
    assert!(matches!(events[1], SchedulerEvent::Fired { .. }));
}

#[test]
fn time_already_passed_today_selects_tomorrow() {
    let h = Harness::at(local_time(2026, 6, 10, 9, 0));
    let next = h.bg.schedule_daily(9, 0, &TaskOptions::new("A")).unwrap();
    assert_eq!(next, local_time(2026, 6, 11, 9, 0));

    let next = h.bg.schedule_daily(6, 30, &TaskOptions::new("A")).unwrap();
    assert_eq!(next, local_time(2026, 6, 11, 6, 30));
}

#[test]
fn rescheduling_replaces_the_single_recurrence() {
    let h = Harness::at(june_morning());
    h.bg.schedule_daily(9, 0, &TaskOptions::new("A")).unwrap();
    h.bg.schedule_daily(10, 15, &TaskOptions::new("B")).unwrap();

    let arms = h.fakes.timer.arms();
    assert_eq!(arms.len(), 2);
    assert!(arms.iter().all(|(_, p)| p.identity == "bgrunner.daily"));
    let spec = h.bg.scheduler().armed_spec().unwrap();
    assert_eq!((spec.hour(), spec.minute()), (10, 15));
    assert!(!h.bg.store().has_options());
    let (_, payload) = h.fakes.timer.last_arm().unwrap();
    assert_eq!(payload.options.title.as_deref(), Some("B"));
}

#[test]
fn fire_while_running_still_rearms() {
    let h = Harness::at(june_morning());
    h.bg.schedule_daily(9, 0, &TaskOptions::new("A")).unwrap();
    h.bg.start(TaskOptions::new("manual")).unwrap();

    let (_, payload) = h.fakes.timer.last_arm().unwrap();
    h.fakes.clock.set(local_time(2026, 6, 10, 9, 0));
    let report = h.bg.handle_fire(payload);

    assert_eq!(report.start.unwrap(), StartOutcome::AlreadyRunning);
    assert!(report.next_fire.is_some());
    assert_eq!(h.fakes.elevator.elevations(), 1);
}

#[test]
fn stop_cancels_the_recurrence() {
    let mut h = Harness::at(june_morning());
    h.bg.schedule_daily(9, 0, &TaskOptions::new("A")).unwrap();
    let (_, payload) = h.fakes.timer.last_arm().unwrap();
    h.bg.handle_fire(payload);

    h.bg.stop().unwrap();
    assert!(h.bg.scheduler().next_fire().is_none());
    assert_eq!(h.fakes.timer.cancels(), vec!["bgrunner.daily".to_owned()]);
    assert!(
        h.drain_scheduler_events()
            .iter()
            .any(|e| matches!(e, SchedulerEvent::Cancelled { .. }))
    );
}

#[test]
fn missing_exact_permission_fails_fast() {
    let h = Harness::at(june_morning());
    h.fakes.permissions.set_exact(false);
    let err = h.bg.schedule_daily(9, 0, &TaskOptions::new("A")).unwrap_err();
    assert!(matches!(err, RunnerError::PermissionDenied(_)));
    assert!(h.fakes.timer.arms().is_empty());
    assert!(!h.bg.store().has_options());
}

#[test]
fn failed_arm_leaves_nothing_to_recover() {
    let h = Harness::at(june_morning());
    h.fakes.timer.set_failing(true);
    assert!(h.bg.schedule_daily(9, 0, &TaskOptions::new("x")).is_err());
    assert!(!h.bg.store().has_options());

    let h = h.restarted(june_morning());
    assert_eq!(
        h.bg.recover_on_launch().unwrap(),
        StartOutcome::NothingToRecover
    );
    assert!(h.fakes.timer.arms().is_empty());
}
