//! Integration Tests for Memos
//!
//! These tests verify that memos are lazy, cached and glitch-free.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tendril_core::prelude::*;
use tendril_core::{MemoState, ReactiveError, SideEffect};

fn counter() -> Arc<AtomicI32> {
    Arc::new(AtomicI32::new(0))
}

/// Test that creating a memo does not evaluate it.
#[test]
fn memo_is_not_eager() {
    let cx = Context::new();
    let computed = counter();

    let computed_clone = computed.clone();
    let cx_clone = cx.clone();
    cx.run(move || {
        cx_clone.create_memo(move || computed_clone.fetch_add(1, Ordering::SeqCst));
    });

    assert_eq!(computed.load(Ordering::SeqCst), 0);
}

/// Test that reading a memo twice in one run computes it once.
#[test]
fn memo_computes_once_per_change() {
    let cx = Context::new();
    let computed = counter();

    let computed_clone = computed.clone();
    let memo = cx.create_memo(move || {
        computed_clone.fetch_add(1, Ordering::SeqCst);
        "value"
    });
    let memo_clone = memo.clone();
    let cx_clone = cx.clone();
    cx.run(move || {
        cx_clone.create_effect(move || {
            memo_clone.get();
            memo_clone.get();
        });
    });

    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert_eq!(memo.state(), MemoState::Clean);
}

/// Test that writes made before the first read do not cause extra
/// computations.
#[test]
fn writes_before_first_read_are_free() {
    let cx = Context::new();
    let computed = counter();

    let computed_clone = computed.clone();
    let cx_clone = cx.clone();
    cx.run(move || {
        let signal = cx_clone.create_signal(0);
        let signal_clone = signal.clone();
        let memo = cx_clone.create_memo(move || {
            computed_clone.fetch_add(1, Ordering::SeqCst);
            signal_clone.get() * 2
        });
        cx_clone.create_effect(move || {
            signal.set(2);
            signal.set(3);
            signal.set(4);
        });
        cx_clone.create_effect(move || {
            memo.get();
        });
    });

    assert_eq!(computed.load(Ordering::SeqCst), 1);
}

/// Test that an unobserved memo is not recomputed by writes.
#[test]
fn unobserved_memo_stays_lazy() {
    let cx = Context::new();
    let computed = counter();

    let computed_clone = computed.clone();
    let cx_clone = cx.clone();
    cx.run(move || {
        let signal = cx_clone.create_signal(0);
        let signal_clone = signal.clone();
        let memo = cx_clone.create_memo(move || {
            computed_clone.fetch_add(1, Ordering::SeqCst);
            signal_clone.get() * 2
        });
        memo.get_untracked();
        cx_clone.create_effect(move || {
            signal.set(2);
            signal.set(3);
            signal.set(4);
        });
    });

    assert_eq!(computed.load(Ordering::SeqCst), 1);
}

/// Test that an observed memo recomputes once for a burst of writes.
#[test]
fn observed_memo_recomputes_for_final_value() {
    let cx = Context::new();
    let computed = counter();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let computed_clone = computed.clone();
    let seen_clone = seen.clone();
    let cx_clone = cx.clone();
    cx.run(move || {
        let signal = cx_clone.create_signal(0);
        let signal_clone = signal.clone();
        let memo = cx_clone.create_memo(move || {
            computed_clone.fetch_add(1, Ordering::SeqCst);
            signal_clone.get() * 2
        });
        cx_clone.create_effect(move || seen_clone.lock().push(memo.get()));
        cx_clone.create_effect(move || {
            signal.set(2);
            signal.set(4);
        });
    });

    assert_eq!(computed.load(Ordering::SeqCst), 2);
    assert_eq!(*seen.lock(), vec![0, 8]);
}

/// Test that an effect is not re-run when a memo recomputes to an equal
/// value.
#[test]
fn equal_memo_values_do_not_propagate() {
    let cx = Context::new();
    let signal = cx.create_signal(0);
    let signal_clone = signal.clone();
    let is_odd = cx.create_memo(move || signal_clone.get() % 2 == 1);
    let is_odd_clone = is_odd.clone();
    let parity = cx.create_memo(move || if is_odd_clone.get() { "odd" } else { "even" });
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    let parity_clone = parity.clone();
    let cx_clone = cx.clone();
    cx.run(move || {
        cx_clone.create_effect(move || seen_clone.lock().push(parity_clone.get()));
    });

    signal.set(2);
    assert_eq!(*seen.lock(), vec!["even"]);

    signal.set(3);
    assert_eq!(*seen.lock(), vec!["even", "odd"]);
}

/// Test that a memo downstream of an unchanged memo is not recomputed.
#[test]
fn unchanged_upstream_skips_recomputation() {
    let cx = Context::new();
    let signal = cx.create_signal(1);
    let signal_clone = signal.clone();
    let is_odd = cx.create_memo(move || signal_clone.get() % 2 == 1);
    let computed = counter();

    let computed_clone = computed.clone();
    let is_odd_clone = is_odd.clone();
    let parity = cx.create_memo(move || {
        computed_clone.fetch_add(1, Ordering::SeqCst);
        if is_odd_clone.get() { "odd" } else { "even" }
    });
    let parity_clone = parity.clone();
    let cx_clone = cx.clone();
    cx.run(move || {
        cx_clone.create_effect(move || {
            parity_clone.get();
        });
    });

    signal.set(11);
    signal.set(13);
    signal.set(3);
    assert_eq!(computed.load(Ordering::SeqCst), 1);
}

/// Test that a diamond of memos is observed consistently: the effect never
/// sees a mix of old and new values.
#[test]
fn diamond_is_glitch_free() {
    let cx = Context::new();
    let source = cx.create_signal(1);
    let source_a = source.clone();
    let left = cx.create_memo(move || source_a.get() + 1);
    let source_b = source.clone();
    let right = cx.create_memo(move || source_b.get() * 10);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    cx.create_effect(move || seen_clone.lock().push((left.get(), right.get())));

    source.set(2);
    let seen = seen.lock();
    assert_eq!(seen.first(), Some(&(2, 10)));
    assert_eq!(seen.last(), Some(&(3, 20)));
    assert!(seen.iter().all(|(l, r)| (l - 1) * 10 == *r));
}

/// Test that side effects inside a memo body are reported.
#[test]
fn memo_side_effects_are_errors() {
    let cx = Context::new();
    let target = cx.create_signal(0);

    let target_clone = target.clone();
    let writer = cx.create_memo(move || {
        target_clone.set(1);
        0
    });
    assert!(matches!(
        writer.try_get(),
        Err(ReactiveError::MemoSideEffect { kind: SideEffect::Write, .. })
    ));

    let cx_clone = cx.clone();
    let spawner = cx.create_memo(move || {
        cx_clone.create_effect(|| {});
        0
    });
    assert!(matches!(
        spawner.try_get(),
        Err(ReactiveError::MemoSideEffect { kind: SideEffect::NestedEffect, .. })
    ));
    assert_eq!(cx.effect_count(), 0);
}
