//! Execute-event delivery across late attach, detach and stop.

use crate::helpers::{Harness, june_morning};
use bgrunner::testing::RecordingConsumer;
use bgrunner::{StatusUpdate, TaskOptions, UpdateOutcome};
use serde_json::json;
use std::sync::Arc;

fn numbered(n: i64) -> TaskOptions {
    TaskOptions::new(format!("T{n}")).with_parameters(json!({ "n": n }))
}

fn numbers(consumer: &RecordingConsumer) -> Vec<i64> {
    consumer
        .events()
        .iter()
        .map(|e| e.parameters["n"].as_i64().unwrap())
        .collect()
}

#[test]
fn events_from_several_runs_flush_in_order() {
    let h = Harness::at(june_morning());
    for n in 1..=3 {
        h.bg.start(numbered(n)).unwrap();
        h.bg.stop().unwrap();
    }
    assert_eq!(h.bg.queue().pending_len(), 3);

    let consumer = Arc::new(RecordingConsumer::new());
    assert_eq!(h.bg.attach_consumer(&consumer), 3);
    assert_eq!(numbers(&consumer), vec![1, 2, 3]);
}

#[test]
fn emit_attach_emit_delivers_exactly_twice() {
    let h = Harness::at(june_morning());
    h.bg.start(numbered(1)).unwrap();
    h.bg.stop().unwrap();

    let consumer = Arc::new(RecordingConsumer::new());
    h.bg.attach_consumer(&consumer);
    h.bg.start(numbered(2)).unwrap();

    assert_eq!(numbers(&consumer), vec![1, 2]);
    assert_eq!(h.bg.queue().pending_len(), 0);
}

#[test]
fn rejected_event_does_not_block_the_next() {
    let h = Harness::at(june_morning());
    h.bg.start(numbered(1)).unwrap();
    h.bg.stop().unwrap();
    h.bg.start(numbered(2)).unwrap();

    let consumer = Arc::new(RecordingConsumer::rejecting(|e| e.parameters["n"] == json!(1)));
    assert_eq!(h.bg.attach_consumer(&consumer), 2);
    assert_eq!(numbers(&consumer), vec![2]);
}

#[test]
fn dropped_consumer_parks_events_again() {
    let h = Harness::at(june_morning());
    let consumer = Arc::new(RecordingConsumer::new());
    h.bg.attach_consumer(&consumer);
    drop(consumer);

    h.bg.start(numbered(1)).unwrap();
    assert_eq!(h.bg.queue().pending_len(), 1);
}

#[test]
fn missing_parameters_arrive_as_empty_object() {
    let h = Harness::at(june_morning());
    let consumer = Arc::new(RecordingConsumer::new());
    h.bg.attach_consumer(&consumer);
    h.bg.start(TaskOptions::new("bare")).unwrap();
    assert_eq!(consumer.events()[0].parameters, json!({}));
}

#[test]
fn present_then_update_shows_one_indicator() {
    let h = Harness::at(june_morning());
    h.bg.start(TaskOptions::new("X")).unwrap();
    assert_eq!(h.bg.update_status(&StatusUpdate::title("Y")), UpdateOutcome::Updated);

    assert_eq!(h.fakes.surface.visible_count(), 1);
    assert_eq!(h.fakes.surface.shown(10001).unwrap().title, "Y");

    h.bg.stop().unwrap();
    assert_eq!(h.fakes.surface.visible_count(), 0);
    assert_eq!(
        h.bg.update_status(&StatusUpdate::title("Z")),
        UpdateOutcome::NoActiveTask
    );
    assert_eq!(h.fakes.surface.visible_count(), 0);
}
