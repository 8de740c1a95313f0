//! Integration Tests for Concurrent Writers
//!
//! Writes from several threads into one context are serialized: effect runs
//! never overlap and every write is observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tendril_core::prelude::*;

/// Test that concurrent writes each trigger one complete effect run.
#[test]
fn concurrent_writes_are_serialized() {
    let cx = Context::new();
    let count = cx.create_signal(0);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicBool::new(false));

    let seen_clone = seen.clone();
    let running_clone = running.clone();
    let count_clone = count.clone();
    cx.create_effect(move || {
        assert!(!running_clone.swap(true, Ordering::SeqCst), "effect runs overlapped");
        let value = count_clone.get();
        thread::sleep(Duration::from_millis(20));
        seen_clone.lock().push(value);
        running_clone.store(false, Ordering::SeqCst);
    });

    let writers: Vec<_> = (1..=5)
        .map(|value| {
            let count = count.clone();
            thread::spawn(move || count.set(value))
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let mut seen = seen.lock().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
}

/// Test that effects created on other threads join the same context.
#[test]
fn effects_can_be_created_from_other_threads() {
    let cx = Context::new();
    let count = cx.create_signal(0);
    let totals = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cx = cx.clone();
            let count = count.clone();
            let totals = totals.clone();
            thread::spawn(move || {
                cx.create_effect(move || totals.lock().push(count.get()));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    count.set(7);
    let totals = totals.lock();
    assert_eq!(totals.iter().filter(|value| **value == 0).count(), 4);
    assert_eq!(totals.iter().filter(|value| **value == 7).count(), 4);
    assert_eq!(cx.effect_count(), 4);
}

/// Test that a signal read on one thread while another thread records does
/// not leak into the other thread's recording.
#[test]
fn recordings_are_per_thread() {
    let cx = Context::new();
    let watched = cx.create_signal(0);
    let foreign = cx.create_signal(0);
    let runs = Arc::new(Mutex::new(0));

    let runs_clone = runs.clone();
    let (watched_clone, foreign_clone) = (watched.clone(), foreign.clone());
    cx.create_effect(move || {
        watched_clone.get();
        let foreign = foreign_clone.clone();
        thread::spawn(move || foreign.get()).join().unwrap();
        *runs_clone.lock() += 1;
    });

    foreign.set(1);
    assert_eq!(*runs.lock(), 1);
    watched.set(1);
    assert_eq!(*runs.lock(), 2);
}

/// Test that pushes and pops from several threads pair up: every pop finds
/// an element and every element's effect is cleaned up exactly once.
#[test]
fn concurrent_push_and_pop_stay_consistent() {
    let cx = Context::new();
    let list = cx.create_list_signal(Vec::<i32>::new());
    let cleaned = Arc::new(Mutex::new(Vec::new()));

    let cleaned_clone = cleaned.clone();
    let cx_clone = cx.clone();
    list.on_add(move |cell, _| {
        let cleaned = cleaned_clone.clone();
        let value = cell.get_untracked();
        cx_clone.cleanup(move || cleaned.lock().push(value));
    });

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let list = list.clone();
            thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        list.push(worker * 100 + i);
                        list.pop()
                    })
                    .all(|popped| popped.is_some())
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    assert!(list.get_untracked().is_empty());
    let mut cleaned = cleaned.lock().clone();
    cleaned.sort_unstable();
    let mut expected: Vec<i32> = (0..4).flat_map(|w| (0..50).map(move |i| w * 100 + i)).collect();
    expected.sort_unstable();
    assert_eq!(cleaned, expected);
}
