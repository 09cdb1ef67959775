// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Clock Tests
//!
//! Wall clock steps and their effect on pending timeouts. Steps are
//! process-wide, so these tests live in their own binary and serialize on
//! [`STEP_LOCK`].

use rustux_sync::clock::{self, ClockSelector};
use rustux_sync::{Error, Mutex, CLOCK_MONOTONIC, CLOCK_REALTIME};
use std::sync::Arc;
use std::time::{Duration, Instant};

static STEP_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

const NSEC_PER_SEC: i64 = 1_000_000_000;

fn serialize() -> std::sync::MutexGuard<'static, ()> {
    STEP_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < Duration::from_secs(5), "condition never held");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn clocks_advance() {
    let _serial = serialize();
    let mono = clock::monotonic_now();
    let real = ClockSelector::Realtime.now();
    std::thread::sleep(Duration::from_millis(5));
    assert!(clock::monotonic_now() > mono);
    assert!(clock::now(ClockSelector::Realtime) >= real);
    assert_eq!(ClockSelector::try_from(CLOCK_MONOTONIC), Ok(ClockSelector::Monotonic));
    assert_eq!(ClockSelector::try_from(7), Err(Error::InvalidArgs));
}

#[test]
fn forward_step_expires_realtime_wait_early() {
    let _serial = serialize();
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let waiter = std::thread::spawn(move || {
        let at = clock::realtime_now() + Duration::from_secs(30);
        let start = Instant::now();
        (m.clock_lock(CLOCK_REALTIME, Some(&at)), start.elapsed())
    });
    wait_for(|| mutex.waiter_count() == 1);

    clock::step_realtime(60 * NSEC_PER_SEC);
    let (result, elapsed) = waiter.join().unwrap();
    clock::step_realtime(-60 * NSEC_PER_SEC);

    assert_eq!(result, Err(Error::TimedOut));
    assert!(elapsed < Duration::from_secs(10));
    mutex.unlock().unwrap();
}

#[test]
fn backward_step_delays_realtime_wait() {
    let _serial = serialize();
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let waiter = std::thread::spawn(move || {
        let at = clock::realtime_now() + Duration::from_millis(100);
        m.clock_lock(CLOCK_REALTIME, Some(&at))
    });
    wait_for(|| mutex.waiter_count() == 1);

    clock::step_realtime(-3600 * NSEC_PER_SEC);
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(mutex.waiter_count(), 1, "wait expired despite the backward step");

    clock::step_realtime(3600 * NSEC_PER_SEC);
    assert_eq!(waiter.join().unwrap(), Err(Error::TimedOut));
    mutex.unlock().unwrap();
}

#[test]
fn monotonic_wait_ignores_realtime_step() {
    let _serial = serialize();
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let waiter = std::thread::spawn(move || {
        let at = clock::monotonic_now() + Duration::from_millis(200);
        let start = Instant::now();
        (m.clock_lock(CLOCK_MONOTONIC, Some(&at)), start.elapsed())
    });
    wait_for(|| mutex.waiter_count() == 1);

    clock::step_realtime(3600 * NSEC_PER_SEC);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(mutex.waiter_count(), 1);
    clock::step_realtime(-3600 * NSEC_PER_SEC);

    let (result, elapsed) = waiter.join().unwrap();
    assert_eq!(result, Err(Error::TimedOut));
    assert!(elapsed >= Duration::from_millis(199));
    mutex.unlock().unwrap();
}
