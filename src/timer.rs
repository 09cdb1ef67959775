// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Timer Management
//!
//! One-shot timers backing the timed variants of every blocking primitive.
//!
//! # Design
//!
//! - **Service thread**: a single background thread, started on first use,
//!   sleeps until the earliest pending deadline
//! - **Per-clock ordering**: monotonic and realtime timers live in separate
//!   deadline-ordered maps; realtime deadlines are re-read against the wall
//!   clock every pass, so a clock step takes effect on the next pass
//! - **Cancellation**: arming returns a [`TimerHandle`]; cancelling before
//!   the deadline guarantees the callback never runs
//! - **Callbacks run unlocked**: expired entries are detached first, then
//!   their callbacks run outside the timer lock
//!
//! # Usage
//!
//! ```rust,ignore
//! let handle = timer::arm_monotonic(deadline, Box::new(move || expire(tid)));
//!
//! // Woken by another cause first
//! handle.cancel();
//! ```

use crate::clock::{self, ClockSelector};
use crate::config::{self, TraceFlags};
use crate::debug::trace_enabled;
use crate::types::Timespec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

/// ============================================================================
/// Timer Handle
/// ============================================================================

/// Timer callback type
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation token for an armed timer
#[derive(Debug, PartialEq, Eq)]
pub struct TimerHandle {
    key: TimerKey,
}

impl TimerHandle {
    /// Timer id (unique for the life of the process)
    pub fn id(&self) -> u64 {
        self.key.id
    }

    /// Clock the timer is armed on
    pub fn clock(&self) -> ClockSelector {
        self.key.clock
    }

    /// Cancel the timer
    ///
    /// # Returns
    ///
    /// `true` if the timer was still pending. `false` means the callback has
    /// already been detached for running (or has run).
    pub fn cancel(self) -> bool {
        let cancelled = timer_queue().lock().remove(&self.key).is_some();
        log_trace_if!(
            trace_enabled(TraceFlags::TIMER),
            "timer {} cancel: {}",
            self.key.id,
            if cancelled { "pending" } else { "already fired" }
        );
        cancelled
    }
}

/// ============================================================================
/// Timer Queue
/// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    clock: ClockSelector,
    at: Timespec,
    id: u64,
}

/// Pending timers, ordered by deadline then arming order
#[derive(Default)]
struct TimerState {
    monotonic: BTreeMap<(Timespec, u64), TimerCallback>,
    realtime: BTreeMap<(Timespec, u64), TimerCallback>,
}

impl TimerState {
    fn map(&mut self, clock: ClockSelector) -> &mut BTreeMap<(Timespec, u64), TimerCallback> {
        match clock {
            ClockSelector::Monotonic => &mut self.monotonic,
            ClockSelector::Realtime => &mut self.realtime,
        }
    }

    fn insert(&mut self, key: TimerKey, callback: TimerCallback) {
        self.map(key.clock).insert((key.at, key.id), callback);
    }

    fn remove(&mut self, key: &TimerKey) -> Option<TimerCallback> {
        self.map(key.clock).remove(&(key.at, key.id))
    }

    fn len(&self) -> usize {
        self.monotonic.len() + self.realtime.len()
    }

    /// Detach every timer whose deadline is at or before the given times
    fn take_expired(&mut self, mono_now: Timespec, rt_now: Timespec) -> Vec<(u64, TimerCallback)> {
        let mut expired = Vec::new();
        for (map, now) in [(&mut self.monotonic, mono_now), (&mut self.realtime, rt_now)] {
            while let Some(entry) = map.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                let ((_, id), callback) = entry.remove_entry();
                expired.push((id, callback));
            }
        }
        expired
    }

    /// How long to sleep before the earliest pending deadline
    fn next_wait(&self, mono_now: Timespec, rt_now: Timespec) -> Option<Duration> {
        let mono = self
            .monotonic
            .keys()
            .next()
            .map(|(at, _)| at.saturating_duration_since(mono_now));
        let rt = self
            .realtime
            .keys()
            .next()
            .map(|(at, _)| at.saturating_duration_since(rt_now));
        match (mono, rt) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

struct TimerQueue {
    state: Mutex<TimerState>,
    wakeup: Condvar,
    next_id: AtomicU64,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, clock: ClockSelector, at: Timespec, callback: TimerCallback) -> TimerHandle {
        let key = TimerKey {
            clock,
            at,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        self.lock().insert(key, callback);
        self.wakeup.notify_one();
        log_trace_if!(
            trace_enabled(TraceFlags::TIMER),
            "timer {} armed on {:?} at {:?}",
            key.id,
            clock,
            at
        );
        TimerHandle { key }
    }

    /// Service thread body
    fn run(&self) {
        let mut state = self.lock();
        loop {
            let mono_now = clock::monotonic_now();
            let rt_now = clock::realtime_now();

            let expired = state.take_expired(mono_now, rt_now);
            if !expired.is_empty() {
                drop(state);
                for (id, callback) in expired {
                    log_trace_if!(trace_enabled(TraceFlags::TIMER), "timer {} fired", id);
                    callback();
                }
                state = self.lock();
                continue;
            }

            state = match state.next_wait(mono_now, rt_now) {
                Some(timeout) => {
                    self.wakeup
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

static TIMER_QUEUE: OnceLock<TimerQueue> = OnceLock::new();

fn timer_queue() -> &'static TimerQueue {
    TIMER_QUEUE.get_or_init(|| {
        let name = config::get().timer_thread_name.clone();
        std::thread::Builder::new()
            .name(name)
            .spawn(|| timer_queue().run())
            .unwrap_or_else(|err| panic!("timer: failed to start service thread: {}", err));
        log_debug!("timer service thread started");
        TimerQueue::new()
    })
}

/// ============================================================================
/// Public API
/// ============================================================================

/// Arm a timer on the monotonic clock
pub fn arm_monotonic(at: Timespec, callback: TimerCallback) -> TimerHandle {
    timer_queue().arm(ClockSelector::Monotonic, at, callback)
}

/// Arm a timer on the wall clock
pub fn arm_realtime(at: Timespec, callback: TimerCallback) -> TimerHandle {
    timer_queue().arm(ClockSelector::Realtime, at, callback)
}

/// Number of timers still pending
pub fn pending() -> usize {
    timer_queue().lock().len()
}

/// Make the service thread re-evaluate its deadlines
pub(crate) fn kick() {
    if let Some(queue) = TIMER_QUEUE.get() {
        let _state = queue.lock();
        queue.wakeup.notify_one();
    }
}
