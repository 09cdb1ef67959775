// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Condition Variable
//!
//! Lets a thread atomically release a [`Mutex`] and wait for a signal,
//! then re-acquire the mutex before returning.
//!
//! # Design
//!
//! - **No lost wakeups**: the waiter is queued before the mutex is
//!   released, so any signal sent after the release finds it
//! - **Mutex binding**: the first waiter binds the condition variable to its
//!   mutex; waiting with another mutex while bound is `MutexMismatch`. The
//!   binding is dropped once no thread is waiting
//! - **Mutex always re-held**: every return path that got past validation
//!   re-acquires the mutex (restoring recursion depth), including timeouts
//!   and interruptions
//! - **Spurious wakes**: an interruption is reported as a normal return;
//!   callers re-check their predicate in a loop
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::sync::{Condvar, Mutex};
//!
//! let mutex = Mutex::new();
//! let cv = Condvar::new();
//!
//! mutex.lock().unwrap();
//! // while !ready { cv.wait(&mutex).unwrap(); }
//! cv.signal().unwrap();
//! mutex.unlock().unwrap();
//! ```

use crate::clock::{ClockSelector, Deadline};
use crate::errors::{Error, Result};
use crate::sync::mutex::Mutex;
use crate::sync::wait_queue::{Discipline, WaitQueue, WakeReason};
use crate::sync::ObjectTag;
use crate::thread::{BlockReason, Thread};
use crate::types::{ClockId, Timespec};

/// Magic number for condition variable validation
const CONDVAR_MAGIC: u32 = 0x434F_4E44; // "COND" in hex

/// Condition variable attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondvarAttr {
    /// Clock used by [`Condvar::timed_wait`]
    pub clock: ClockSelector,

    pub discipline: Discipline,
}

impl CondvarAttr {
    pub const DEFAULT: CondvarAttr = CondvarAttr {
        clock: ClockSelector::Realtime,
        discipline: Discipline::Priority,
    };

    pub const fn with_clock(mut self, clock: ClockSelector) -> Self {
        self.clock = clock;
        self
    }

    pub const fn with_discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }
}

impl Default for CondvarAttr {
    fn default() -> Self {
        Self::DEFAULT
    }
}

struct CondvarState {
    /// Address of the bound mutex
    mutex: Option<usize>,
}

/// Condition variable
pub struct Condvar {
    tag: ObjectTag,
    clock: ClockSelector,
    state: spin::Mutex<CondvarState>,
    queue: WaitQueue,
}

impl Condvar {
    /// Create a statically initialized condition variable
    pub const fn new() -> Self {
        Self::build(ObjectTag::auto(), CondvarAttr::DEFAULT)
    }

    /// Create an initialized condition variable
    pub const fn with_attr(attr: CondvarAttr) -> Self {
        Self::build(ObjectTag::valid(CONDVAR_MAGIC), attr)
    }

    const fn build(tag: ObjectTag, attr: CondvarAttr) -> Self {
        Self {
            tag,
            clock: attr.clock,
            state: spin::Mutex::new(CondvarState { mutex: None }),
            queue: WaitQueue::new(attr.discipline, BlockReason::CondVar),
        }
    }

    /// Initialize (or re-initialize after destroy)
    pub fn init(&mut self, attr: CondvarAttr) {
        *self = Self::with_attr(attr);
    }

    /// Destroy the condition variable
    ///
    /// # Returns
    ///
    /// `Busy` if threads are waiting
    pub fn destroy(&self) -> Result<()> {
        self.tag.validate(CONDVAR_MAGIC)?;
        let _state = self.state.lock();
        if !self.queue.is_empty() {
            return Err(Error::Busy);
        }
        self.tag.destroy();
        Ok(())
    }

    /// Clock used by [`timed_wait`](Self::timed_wait)
    pub fn clock(&self) -> ClockSelector {
        self.clock
    }

    /// Wait for a signal
    ///
    /// The caller must own `mutex`; it is released while waiting and held
    /// again on return.
    pub fn wait(&self, mutex: &Mutex) -> Result<()> {
        self.wait_common(mutex, None)
    }

    /// Wait with a deadline on the condition variable's clock
    pub fn timed_wait(&self, mutex: &Mutex, abstime: Option<&Timespec>) -> Result<()> {
        self.clock_wait(mutex, self.clock.id(), abstime)
    }

    /// Wait with a deadline on the given clock
    ///
    /// # Returns
    ///
    /// `InvalidArgs` for a bad clock or deadline, `NotOwner` if the caller
    /// does not own `mutex`, `MutexMismatch` if another mutex is bound,
    /// `TimedOut` once the deadline passes (with `mutex` held again)
    pub fn clock_wait(
        &self,
        mutex: &Mutex,
        clock_id: ClockId,
        abstime: Option<&Timespec>,
    ) -> Result<()> {
        self.tag.validate(CONDVAR_MAGIC)?;
        let deadline = Deadline::new(clock_id, abstime)?;
        self.wait_common(mutex, Some(deadline))
    }

    /// Wait with an already validated deadline
    pub fn wait_until(&self, mutex: &Mutex, deadline: &Deadline) -> Result<()> {
        self.wait_common(mutex, Some(*deadline))
    }

    fn wait_common(&self, mutex: &Mutex, deadline: Option<Deadline>) -> Result<()> {
        self.tag.validate(CONDVAR_MAGIC)?;
        mutex.validate()?;
        let current = Thread::current();
        if !mutex.is_owned_by(&current) {
            return Err(Error::NotOwner);
        }

        let key = mutex as *const Mutex as usize;
        let mut state = self.state.lock();
        if state.mutex.is_some_and(|bound| bound != key) {
            return Err(Error::MutexMismatch);
        }
        if deadline.as_ref().is_some_and(Deadline::has_expired) {
            return Err(Error::TimedOut);
        }
        state.mutex = Some(key);

        let blocker = self.queue.enqueue(0, deadline.as_ref());
        drop(state);

        let depth = match mutex.release_for_wait(&current) {
            Ok(depth) => depth,
            Err(err) => {
                drop(blocker);
                self.unbind_if_idle();
                return Err(err);
            }
        };

        let reason = blocker.wait();
        self.unbind_if_idle();
        mutex.reacquire(depth)?;

        match reason {
            WakeReason::TimedOut => Err(Error::TimedOut),
            WakeReason::Satisfied => Ok(()),
            WakeReason::Interrupted => {
                log_trace!("condvar {:p}: tid {} spurious wake", self, current.tid());
                Ok(())
            }
        }
    }

    /// Wake one waiter
    pub fn signal(&self) -> Result<()> {
        self.tag.validate(CONDVAR_MAGIC)?;
        let mut state = self.state.lock();
        self.queue.dequeue_one();
        if self.queue.is_empty() {
            state.mutex = None;
        }
        Ok(())
    }

    /// Wake every waiter
    pub fn broadcast(&self) -> Result<()> {
        self.tag.validate(CONDVAR_MAGIC)?;
        let mut state = self.state.lock();
        let woken = self.queue.dequeue_all();
        log_trace!("condvar {:p}: broadcast woke {} threads", self, woken.len());
        state.mutex = None;
        Ok(())
    }

    fn unbind_if_idle(&self) {
        let mut state = self.state.lock();
        if self.queue.is_empty() {
            state.mutex = None;
        }
    }

    /// Check whether a mutex is currently bound
    pub fn is_bound(&self) -> bool {
        self.state.lock().mutex.is_some()
    }

    /// Number of threads waiting
    pub fn waiter_count(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CLOCK_MONOTONIC, CLOCK_THREAD_CPUTIME_ID};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_requires_ownership() {
        let mutex = Mutex::new();
        let cv = Condvar::new();
        assert_eq!(cv.wait(&mutex), Err(Error::NotOwner));
        assert!(!cv.is_bound());
    }

    #[test]
    fn invalid_clock_is_rejected_before_anything_else() {
        let mutex = Mutex::new();
        let cv = Condvar::new();
        mutex.lock().unwrap();
        let at = Timespec::new(1, 0);
        assert_eq!(cv.clock_wait(&mutex, CLOCK_THREAD_CPUTIME_ID, Some(&at)), Err(Error::InvalidArgs));
        assert_eq!(cv.timed_wait(&mutex, None), Err(Error::InvalidArgs));
        assert!(mutex.is_owned_by(&Thread::current()));
        assert!(!cv.is_bound());
        mutex.unlock().unwrap();
    }

    #[test]
    fn timeout_reacquires_mutex() {
        let mutex = Mutex::new();
        let cv = Condvar::with_attr(CondvarAttr::DEFAULT.with_clock(ClockSelector::Monotonic));
        mutex.lock().unwrap();
        let at = ClockSelector::Monotonic.now() + Duration::from_millis(20);
        let start = Instant::now();
        assert_eq!(cv.timed_wait(&mutex, Some(&at)), Err(Error::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(19));
        assert!(mutex.is_owned_by(&Thread::current()));
        assert!(!cv.is_bound());
        mutex.unlock().unwrap();
    }

    #[test]
    fn past_deadline_times_out_without_releasing() {
        let mutex = Mutex::new();
        let cv = Condvar::new();
        mutex.lock().unwrap();
        assert_eq!(cv.clock_wait(&mutex, CLOCK_MONOTONIC, Some(&Timespec::ZERO)), Err(Error::TimedOut));
        assert!(mutex.is_owned_by(&Thread::current()));
        assert_eq!(cv.waiter_count(), 0);
        mutex.unlock().unwrap();
    }

    #[test]
    fn second_mutex_is_a_mismatch_while_bound() {
        let m1 = Arc::new(Mutex::new());
        let m2 = Mutex::new();
        let cv = Arc::new(Condvar::new());

        let (wm, wc) = (Arc::clone(&m1), Arc::clone(&cv));
        let waiter = std::thread::spawn(move || {
            wm.lock().unwrap();
            let result = wc.wait(&wm);
            wm.unlock().unwrap();
            result
        });
        while cv.waiter_count() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        m2.lock().unwrap();
        assert_eq!(cv.clock_wait(&m2, CLOCK_MONOTONIC, Some(&Timespec::ZERO)), Err(Error::MutexMismatch));
        m2.unlock().unwrap();

        cv.signal().unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert!(!cv.is_bound());

        m2.lock().unwrap();
        assert_eq!(cv.clock_wait(&m2, CLOCK_MONOTONIC, Some(&Timespec::ZERO)), Err(Error::TimedOut));
        m2.unlock().unwrap();
    }

    #[test]
    fn recursive_depth_is_restored() {
        use crate::sync::mutex::{MutexAttr, MutexKind};
        let mutex = Mutex::with_attr(MutexAttr::DEFAULT.with_kind(MutexKind::Recursive));
        let cv = Condvar::new();
        mutex.lock().unwrap();
        mutex.lock().unwrap();
        let deadline = Deadline::after(ClockSelector::Monotonic, Duration::from_millis(5));
        assert_eq!(cv.wait_until(&mutex, &deadline), Err(Error::TimedOut));
        assert_eq!(mutex.depth(), 2);
        mutex.unlock().unwrap();
        mutex.unlock().unwrap();
    }

    #[test]
    fn destroy_with_waiters_is_busy() {
        let mutex = Arc::new(Mutex::new());
        let cv = Arc::new(Condvar::new());
        let (wm, wc) = (Arc::clone(&mutex), Arc::clone(&cv));
        let waiter = std::thread::spawn(move || {
            wm.lock().unwrap();
            let result = wc.wait(&wm);
            wm.unlock().unwrap();
            result
        });
        while cv.waiter_count() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(cv.destroy(), Err(Error::Busy));
        cv.broadcast().unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(cv.destroy(), Ok(()));
        assert_eq!(cv.signal(), Err(Error::InvalidObject));
    }
}
