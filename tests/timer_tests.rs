// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Timer Tests
//!
//! Timed acquisition across the primitives: waits that are satisfied
//! before their deadline, waits that expire, and deadlines that have
//! already passed.

use rustux_sync::clock::{self, ClockSelector};
use rustux_sync::{
    Condvar, Deadline, Error, Mutex, RwLock, Semaphore, Timespec, CLOCK_MONOTONIC,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for "returned promptly"; generous for loaded CI machines
const SLACK: Duration = Duration::from_secs(2);

fn monotonic_in(d: Duration) -> Timespec {
    clock::monotonic_now() + d
}

// ============================================================================
// Satisfied Before Deadline
// ============================================================================

#[test]
fn timed_lock_succeeds_when_released_in_time() {
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let waiter = std::thread::spawn(move || {
        let start = Instant::now();
        let result = m.clock_lock(CLOCK_MONOTONIC, Some(&monotonic_in(Duration::from_millis(500))));
        if result.is_ok() {
            m.unlock().unwrap();
        }
        (result, start.elapsed())
    });

    std::thread::sleep(Duration::from_millis(10));
    mutex.unlock().unwrap();
    let (result, elapsed) = waiter.join().unwrap();
    assert_eq!(result, Ok(()));
    assert!(elapsed < Duration::from_millis(500));
}

#[test]
fn timed_semaphore_wait_succeeds_on_post() {
    let sem = Arc::new(Semaphore::new(0));
    let s = Arc::clone(&sem);
    let waiter = std::thread::spawn(move || {
        s.clock_wait(CLOCK_MONOTONIC, Some(&monotonic_in(Duration::from_millis(500))))
    });
    while sem.waiter_count() == 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    sem.post().unwrap();
    assert_eq!(waiter.join().unwrap(), Ok(()));
}

// ============================================================================
// Expiry
// ============================================================================

#[test]
fn timed_lock_times_out() {
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let waiter = std::thread::spawn(move || {
        let start = Instant::now();
        let result = m.clock_lock(CLOCK_MONOTONIC, Some(&monotonic_in(Duration::from_millis(20))));
        (result, start.elapsed())
    });
    let (result, elapsed) = waiter.join().unwrap();
    assert_eq!(result, Err(Error::TimedOut));
    assert!(elapsed >= Duration::from_millis(19), "returned after {:?}", elapsed);
    assert!(elapsed < SLACK);
    assert_eq!(mutex.waiter_count(), 0);
    mutex.unlock().unwrap();
}

#[test]
fn realtime_timed_lock_times_out() {
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let result = std::thread::spawn(move || {
        let at = clock::realtime_now() + Duration::from_millis(20);
        m.timed_lock(Some(&at))
    })
    .join()
    .unwrap();
    assert_eq!(result, Err(Error::TimedOut));
    mutex.unlock().unwrap();
}

#[test]
fn timed_condvar_wait_reacquires_mutex() {
    let mutex = Mutex::new();
    let cv = Condvar::new();
    mutex.lock().unwrap();

    let deadline = Deadline::after(ClockSelector::Monotonic, Duration::from_millis(20));
    let start = Instant::now();
    assert_eq!(cv.wait_until(&mutex, &deadline), Err(Error::TimedOut));
    assert!(start.elapsed() >= Duration::from_millis(19));
    assert!(mutex.is_owned_by(&rustux_sync::Thread::current()));
    mutex.unlock().unwrap();
}

#[test]
fn timed_rwlock_waits_expire() {
    let lock = Arc::new(RwLock::new());
    lock.write().unwrap();

    let l = Arc::clone(&lock);
    let (read, write) = std::thread::spawn(move || {
        let read = l.clock_read(CLOCK_MONOTONIC, Some(&monotonic_in(Duration::from_millis(15))));
        let write = l.clock_write(CLOCK_MONOTONIC, Some(&monotonic_in(Duration::from_millis(15))));
        (read, write)
    })
    .join()
    .unwrap();
    assert_eq!(read, Err(Error::TimedOut));
    assert_eq!(write, Err(Error::TimedOut));
    assert_eq!(lock.waiter_count(), 0);
    lock.unlock().unwrap();
}

#[test]
fn no_timers_leak_after_timeouts() {
    let sem = Semaphore::new(0);
    for _ in 0..5 {
        let deadline = Deadline::after(ClockSelector::Monotonic, Duration::from_millis(2));
        assert_eq!(sem.wait_until(&deadline), Err(Error::TimedOut));
    }
    let sem = Arc::new(Semaphore::new(0));
    let s = Arc::clone(&sem);
    let waiter = std::thread::spawn(move || {
        s.clock_wait(CLOCK_MONOTONIC, Some(&monotonic_in(Duration::from_secs(60))))
    });
    while sem.waiter_count() == 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    sem.post().unwrap();
    assert_eq!(waiter.join().unwrap(), Ok(()));
    // The satisfied wait cancelled its one-minute timer
    let start = Instant::now();
    while rustux_sync::timer::pending() > 0 {
        assert!(start.elapsed() < SLACK, "timer still pending");
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// Past Deadlines
// ============================================================================

#[test]
fn past_deadline_returns_immediately() {
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let (result, elapsed) = std::thread::spawn(move || {
        let start = Instant::now();
        (m.clock_lock(CLOCK_MONOTONIC, Some(&Timespec::ZERO)), start.elapsed())
    })
    .join()
    .unwrap();
    assert_eq!(result, Err(Error::TimedOut));
    assert!(elapsed < SLACK);
    assert_eq!(mutex.waiter_count(), 0);
    mutex.unlock().unwrap();
}

#[test]
fn past_deadline_on_available_object_succeeds() {
    let mutex = Mutex::new();
    assert_eq!(mutex.clock_lock(CLOCK_MONOTONIC, Some(&Timespec::ZERO)), Ok(()));
    mutex.unlock().unwrap();

    let sem = Semaphore::new(1);
    assert_eq!(sem.clock_wait(CLOCK_MONOTONIC, Some(&Timespec::ZERO)), Ok(()));

    let lock = RwLock::new();
    assert_eq!(lock.clock_read(CLOCK_MONOTONIC, Some(&Timespec::ZERO)), Ok(()));
    lock.unlock().unwrap();
    assert_eq!(lock.clock_write(CLOCK_MONOTONIC, Some(&Timespec::ZERO)), Ok(()));
    lock.unlock().unwrap();
}
