// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Semaphore
//!
//! Counting semaphore.
//!
//! # Design
//!
//! - **Direct handoff**: `post` with waiters present hands the unit straight
//!   to the selected waiter; the count only grows when nobody is waiting
//! - **No owner**: a semaphore has no owning thread, so its queue never
//!   carries priority inheritance
//! - **Bounded count**: the value never exceeds [`SEM_VALUE_MAX`]
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::sync::Semaphore;
//!
//! static SLOTS: Semaphore = Semaphore::new(2);
//!
//! SLOTS.wait().unwrap();
//! SLOTS.try_wait().unwrap();
//! assert!(SLOTS.try_wait().is_err());
//! SLOTS.post().unwrap();
//! assert_eq!(SLOTS.value(), 1);
//! ```

use crate::clock::Deadline;
use crate::errors::{Error, Result};
use crate::sync::wait_queue::{Discipline, WaitQueue, WakeReason};
use crate::sync::ObjectTag;
use crate::thread::{BlockReason, Thread};
use crate::types::{ClockId, Timespec, CLOCK_REALTIME};

/// Magic number for semaphore validation
const SEMAPHORE_MAGIC: u32 = 0x5345_4D41; // "SEMA" in hex

/// Largest value a semaphore can hold
pub const SEM_VALUE_MAX: u32 = i32::MAX as u32;

/// Wait queue tag for waiters
const UNIT_WAITER: u32 = 0;

/// Counting semaphore
pub struct Semaphore {
    tag: ObjectTag,
    count: spin::Mutex<u32>,
    queue: WaitQueue,
}

impl Semaphore {
    /// Create a statically initialized semaphore
    ///
    /// Values above [`SEM_VALUE_MAX`] are clamped.
    pub const fn new(value: u32) -> Self {
        Self::build(ObjectTag::auto(), value, Discipline::Priority)
    }

    /// Create a semaphore with an explicit waiter order
    pub const fn with_discipline(value: u32, discipline: Discipline) -> Self {
        Self::build(ObjectTag::valid(SEMAPHORE_MAGIC), value, discipline)
    }

    const fn build(tag: ObjectTag, value: u32, discipline: Discipline) -> Self {
        let value = if value > SEM_VALUE_MAX { SEM_VALUE_MAX } else { value };
        Self {
            tag,
            count: spin::Mutex::new(value),
            queue: WaitQueue::new(discipline, BlockReason::Semaphore),
        }
    }

    /// Initialize (or re-initialize after destroy)
    ///
    /// # Returns
    ///
    /// `InvalidArgs` if `value` exceeds [`SEM_VALUE_MAX`]
    pub fn init(&mut self, value: u32, discipline: Discipline) -> Result<()> {
        if value > SEM_VALUE_MAX {
            return Err(Error::InvalidArgs);
        }
        *self = Self::with_discipline(value, discipline);
        Ok(())
    }

    /// Destroy the semaphore
    ///
    /// # Returns
    ///
    /// `Busy` if threads are blocked on it
    pub fn destroy(&self) -> Result<()> {
        self.validate()?;
        let _count = self.count.lock();
        if !self.queue.is_empty() {
            return Err(Error::Busy);
        }
        self.tag.destroy();
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.tag.validate(SEMAPHORE_MAGIC)
    }

    pub fn discipline(&self) -> Discipline {
        self.queue.discipline()
    }

    /// Release one unit
    ///
    /// # Returns
    ///
    /// `Overflow` if the count is already at [`SEM_VALUE_MAX`]
    pub fn post(&self) -> Result<()> {
        self.validate()?;
        let mut count = self.count.lock();
        if let Some(thread) = self.queue.dequeue_one() {
            log_trace!("sem {:p}: unit handed to tid {}", self, thread.tid());
            return Ok(());
        }
        if *count >= SEM_VALUE_MAX {
            return Err(Error::Overflow);
        }
        *count += 1;
        Ok(())
    }

    /// Take one unit without blocking
    ///
    /// # Returns
    ///
    /// `Busy` if the count is zero
    pub fn try_wait(&self) -> Result<()> {
        self.validate()?;
        self.acquire(None, false)
    }

    /// Take one unit, blocking as long as necessary
    pub fn wait(&self) -> Result<()> {
        self.validate()?;
        self.acquire(None, true)
    }

    /// Take one unit with a wall-clock deadline
    pub fn timed_wait(&self, abstime: Option<&Timespec>) -> Result<()> {
        self.clock_wait(CLOCK_REALTIME, abstime)
    }

    /// Take one unit with a deadline on the given clock
    pub fn clock_wait(&self, clock_id: ClockId, abstime: Option<&Timespec>) -> Result<()> {
        self.validate()?;
        let deadline = Deadline::new(clock_id, abstime)?;
        self.acquire(Some(&deadline), true)
    }

    pub fn wait_until(&self, deadline: &Deadline) -> Result<()> {
        self.validate()?;
        self.acquire(Some(deadline), true)
    }

    fn acquire(&self, deadline: Option<&Deadline>, block: bool) -> Result<()> {
        loop {
            let mut count = self.count.lock();
            if *count > 0 {
                *count -= 1;
                return Ok(());
            }

            if !block {
                return Err(Error::Busy);
            }
            if deadline.is_some_and(Deadline::has_expired) {
                return Err(Error::TimedOut);
            }

            match self.queue.block(count, UNIT_WAITER, deadline) {
                WakeReason::Satisfied => return Ok(()),
                WakeReason::TimedOut => return Err(Error::TimedOut),
                WakeReason::Interrupted => {
                    log_trace!(
                        "sem {:p}: tid {} interrupted, retrying",
                        self,
                        Thread::current().tid()
                    );
                }
            }
        }
    }

    /// Current count
    pub fn value(&self) -> u32 {
        *self.count.lock()
    }

    /// Number of threads blocked on the semaphore
    pub fn waiter_count(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}
