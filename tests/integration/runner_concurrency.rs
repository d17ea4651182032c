//! Concurrent triggers and racing attach/emit.

use crate::helpers::{Harness, june_morning};
use bgrunner::events::EventQueue;
use bgrunner::testing::RecordingConsumer;
use bgrunner::{ExecuteEvent, StartOutcome, StopOutcome, TaskOptions};
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::time::Duration;

#[test]
fn concurrent_starts_elevate_exactly_once() {
    let h = Harness::at(june_morning());
    h.fakes.elevator.set_delay(Duration::from_millis(50));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let bg = Arc::clone(&h.bg);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                bg.start(TaskOptions::new(format!("T{i}"))).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    let started = outcomes
        .iter()
        .filter(|o| **o == StartOutcome::Started)
        .count();
    assert_eq!(started, 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == StartOutcome::AlreadyRunning)
            .count(),
        7
    );
    assert_eq!(h.fakes.elevator.elevations(), 1);
    assert_eq!(h.bg.queue().pending_len(), 1);
}

#[test]
fn stop_when_idle_changes_nothing() {
    let h = Harness::at(june_morning());
    h.bg.store().save(&TaskOptions::new("left over")).unwrap();

    assert_eq!(h.bg.stop().unwrap(), StopOutcome::NotRunning);
    assert!(h.bg.store().has_options());
    assert!(h.fakes.timer.cancels().is_empty());
    assert_eq!(h.fakes.elevator.active(), 0);
}

#[test]
fn racing_emits_and_attach_lose_nothing() {
    let queue = Arc::new(EventQueue::new());
    let consumer = Arc::new(RecordingConsumer::new());
    let barrier = Arc::new(Barrier::new(5));

    let emitters: Vec<_> = (0..4)
        .map(|t| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for i in 0..50 {
                    queue.emit(ExecuteEvent::new(json!({ "t": t, "i": i })));
                }
            })
        })
        .collect();

    barrier.wait();
    queue.attach(&consumer);
    for emitter in emitters {
        emitter.join().unwrap();
    }

    assert_eq!(consumer.count(), 200);
    assert_eq!(queue.pending_len(), 0);

    // Per-thread order is preserved.
    let events = consumer.events();
    for t in 0..4 {
        let seq: Vec<_> = events
            .iter()
            .filter(|e| e.parameters["t"] == json!(t))
            .map(|e| e.parameters["i"].as_i64().unwrap())
            .collect();
        assert_eq!(seq, (0..50).collect::<Vec<_>>());
    }
}
