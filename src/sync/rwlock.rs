// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Reader-Writer Lock
//!
//! Shared access for any number of readers, or exclusive access for one
//! writer.
//!
//! # Design
//!
//! - **Readers join readers**: a read request is granted immediately while
//!   the lock is unowned or read-owned, even with writers queued
//! - **Queue head decides**: when the last holder leaves, the waiter the
//!   queue selects first wins. A writer gets exclusive ownership; a reader
//!   is granted together with every reader behind it up to the first writer
//! - **Per-thread holds**: read holds are recorded per thread (and may
//!   nest), so releasing a lock the caller does not hold is `NotOwner`
//! - **Priority inheritance**: the writer, or the first reader, is bound as
//!   the owner of the queue
//!
//! # Lock States
//!
//! ```text
//! Unowned <-> Readers(n) ; Unowned <-> Writer
//! ```

use crate::clock::Deadline;
use crate::errors::{Error, Result};
use crate::sync::wait_queue::{WaitQueue, WakeReason};
use crate::sync::ObjectTag;
use crate::thread::{BlockReason, Thread};
use crate::types::{ClockId, Tid, Timespec, CLOCK_REALTIME};
use std::sync::Arc;

/// Magic number for rwlock validation
const RWLOCK_MAGIC: u32 = 0x5257_4C4B; // "RWLK" in hex

/// Wait queue tag for readers
const READER: u32 = 1;

/// Wait queue tag for writers
const WRITER: u32 = 2;

/// Read hold of one thread
struct ReadHold {
    thread: Arc<Thread>,
    count: u32,
}

enum LockState {
    Unowned,
    Readers(Vec<ReadHold>),
    Writer(Arc<Thread>),
}

/// Reader-writer lock
pub struct RwLock {
    tag: ObjectTag,
    state: spin::Mutex<LockState>,
    queue: WaitQueue,
}

impl RwLock {
    /// Create a statically initialized lock
    pub const fn new() -> Self {
        Self {
            tag: ObjectTag::auto(),
            state: spin::Mutex::new(LockState::Unowned),
            queue: WaitQueue::with_inheritance(BlockReason::RwLock),
        }
    }

    /// Initialize (or re-initialize after destroy)
    ///
    /// # Returns
    ///
    /// `Busy` if the lock is still held
    pub fn init(&mut self) -> Result<()> {
        if !matches!(self.state.get_mut(), LockState::Unowned) {
            return Err(Error::Busy);
        }
        *self = Self::new();
        Ok(())
    }

    /// Destroy the lock
    ///
    /// # Returns
    ///
    /// `Busy` if the lock is held or has waiters
    pub fn destroy(&self) -> Result<()> {
        self.validate()?;
        let state = self.state.lock();
        if !matches!(*state, LockState::Unowned) || !self.queue.is_empty() {
            return Err(Error::Busy);
        }
        self.tag.destroy();
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.tag.validate(RWLOCK_MAGIC)
    }

    /// ========================================================================
    /// Read Side
    /// ========================================================================

    pub fn try_read(&self) -> Result<()> {
        self.validate()?;
        self.acquire_read(None, false)
    }

    pub fn read(&self) -> Result<()> {
        self.validate()?;
        self.acquire_read(None, true)
    }

    /// Read-lock with a wall-clock deadline
    pub fn timed_read(&self, abstime: Option<&Timespec>) -> Result<()> {
        self.clock_read(CLOCK_REALTIME, abstime)
    }

    /// Read-lock with a deadline on the given clock
    pub fn clock_read(&self, clock_id: ClockId, abstime: Option<&Timespec>) -> Result<()> {
        self.validate()?;
        let deadline = Deadline::new(clock_id, abstime)?;
        self.acquire_read(Some(&deadline), true)
    }

    pub fn read_until(&self, deadline: &Deadline) -> Result<()> {
        self.validate()?;
        self.acquire_read(Some(deadline), true)
    }

    fn acquire_read(&self, deadline: Option<&Deadline>, block: bool) -> Result<()> {
        let current = Thread::current();
        loop {
            let mut state = self.state.lock();
            match &mut *state {
                LockState::Unowned => {
                    *state = LockState::Readers(vec![ReadHold {
                        thread: Arc::clone(&current),
                        count: 1,
                    }]);
                    self.queue.set_owner(Some(current));
                    return Ok(());
                }
                LockState::Readers(holds) => {
                    return Self::add_read_hold(holds, &current);
                }
                LockState::Writer(writer) if Arc::ptr_eq(writer, &current) => {
                    return Err(Error::Deadlock);
                }
                LockState::Writer(_) => {}
            }

            if !block {
                return Err(Error::Busy);
            }
            if deadline.is_some_and(Deadline::has_expired) {
                return Err(Error::TimedOut);
            }
            if self.wait(state, READER, deadline, &current)? {
                return Ok(());
            }
        }
    }

    fn add_read_hold(holds: &mut Vec<ReadHold>, current: &Arc<Thread>) -> Result<()> {
        match holds.iter_mut().find(|h| Arc::ptr_eq(&h.thread, current)) {
            Some(hold) => {
                hold.count = hold.count.checked_add(1).ok_or(Error::Overflow)?;
            }
            None => holds.push(ReadHold {
                thread: Arc::clone(current),
                count: 1,
            }),
        }
        Ok(())
    }

    /// ========================================================================
    /// Write Side
    /// ========================================================================

    pub fn try_write(&self) -> Result<()> {
        self.validate()?;
        self.acquire_write(None, false)
    }

    pub fn write(&self) -> Result<()> {
        self.validate()?;
        self.acquire_write(None, true)
    }

    /// Write-lock with a wall-clock deadline
    pub fn timed_write(&self, abstime: Option<&Timespec>) -> Result<()> {
        self.clock_write(CLOCK_REALTIME, abstime)
    }

    /// Write-lock with a deadline on the given clock
    pub fn clock_write(&self, clock_id: ClockId, abstime: Option<&Timespec>) -> Result<()> {
        self.validate()?;
        let deadline = Deadline::new(clock_id, abstime)?;
        self.acquire_write(Some(&deadline), true)
    }

    pub fn write_until(&self, deadline: &Deadline) -> Result<()> {
        self.validate()?;
        self.acquire_write(Some(deadline), true)
    }

    fn acquire_write(&self, deadline: Option<&Deadline>, block: bool) -> Result<()> {
        let current = Thread::current();
        loop {
            let mut state = self.state.lock();
            match &*state {
                LockState::Unowned => {
                    *state = LockState::Writer(Arc::clone(&current));
                    self.queue.set_owner(Some(current));
                    return Ok(());
                }
                LockState::Writer(writer) if Arc::ptr_eq(writer, &current) => {
                    return Err(Error::Deadlock);
                }
                LockState::Readers(holds) if holds.iter().any(|h| Arc::ptr_eq(&h.thread, &current)) => {
                    return Err(Error::Deadlock);
                }
                LockState::Writer(_) | LockState::Readers(_) => {}
            }

            if !block {
                return Err(Error::Busy);
            }
            if deadline.is_some_and(Deadline::has_expired) {
                return Err(Error::TimedOut);
            }
            if self.wait(state, WRITER, deadline, &current)? {
                return Ok(());
            }
        }
    }

    /// Block until granted
    ///
    /// # Returns
    ///
    /// `true` if the lock was granted, `false` to retry after an interruption
    fn wait(
        &self,
        state: spin::MutexGuard<'_, LockState>,
        tag: u32,
        deadline: Option<&Deadline>,
        current: &Thread,
    ) -> Result<bool> {
        match self.queue.block(state, tag, deadline) {
            WakeReason::Satisfied => {
                // The releaser holds the state lock until the grant is recorded
                drop(self.state.lock());
                Ok(true)
            }
            WakeReason::TimedOut => Err(Error::TimedOut),
            WakeReason::Interrupted => {
                log_trace!("rwlock {:p}: tid {} interrupted, retrying", self, current.tid());
                Ok(false)
            }
        }
    }

    /// ========================================================================
    /// Release
    /// ========================================================================

    /// Release a read or write hold of the calling thread
    ///
    /// # Returns
    ///
    /// `NotOwner` if the caller holds neither
    pub fn unlock(&self) -> Result<()> {
        self.validate()?;
        let current = Thread::current();
        let mut state = self.state.lock();
        match &mut *state {
            LockState::Writer(writer) if Arc::ptr_eq(writer, &current) => {}
            LockState::Readers(holds) => {
                let index = holds
                    .iter()
                    .position(|h| Arc::ptr_eq(&h.thread, &current))
                    .ok_or(Error::NotOwner)?;
                holds[index].count -= 1;
                if holds[index].count > 0 {
                    return Ok(());
                }
                holds.remove(index);
                if let Some(first) = holds.first() {
                    if index == 0 {
                        self.queue.set_owner(Some(Arc::clone(&first.thread)));
                    }
                    return Ok(());
                }
            }
            LockState::Writer(_) | LockState::Unowned => return Err(Error::NotOwner),
        }
        self.release_locked(&mut state);
        Ok(())
    }

    /// Grant the lock to the head of the queue, or leave it unowned
    fn release_locked(&self, state: &mut LockState) {
        *state = LockState::Unowned;
        match self.queue.dequeue_one_if(|_| true) {
            None => self.queue.set_owner(None),
            Some((writer, WRITER)) => {
                log_trace!("rwlock {:p}: handoff to writer tid {}", self, writer.tid());
                *state = LockState::Writer(Arc::clone(&writer));
                self.queue.set_owner(Some(writer));
            }
            Some((reader, _)) => {
                let mut holds = vec![ReadHold {
                    thread: reader,
                    count: 1,
                }];
                while let Some((reader, _)) = self.queue.dequeue_one_if(|tag| tag == READER) {
                    holds.push(ReadHold {
                        thread: reader,
                        count: 1,
                    });
                }
                log_trace!("rwlock {:p}: granted {} readers", self, holds.len());
                self.queue.set_owner(Some(Arc::clone(&holds[0].thread)));
                *state = LockState::Readers(holds);
            }
        }
    }

    /// ========================================================================
    /// Queries
    /// ========================================================================

    /// Number of read holds (nested holds counted individually)
    pub fn reader_count(&self) -> u32 {
        match &*self.state.lock() {
            LockState::Readers(holds) => holds.iter().map(|h| h.count).sum(),
            _ => 0,
        }
    }

    /// Writer thread ID, if write-locked
    pub fn writer(&self) -> Option<Tid> {
        match &*self.state.lock() {
            LockState::Writer(writer) => Some(writer.tid()),
            _ => None,
        }
    }

    pub fn is_write_locked(&self) -> bool {
        self.writer().is_some()
    }

    /// Number of threads blocked on the lock
    pub fn waiter_count(&self) -> usize {
        self.queue.len()
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CLOCK_MONOTONIC;
    use std::time::Duration;

    fn wait_for_waiters(lock: &RwLock, n: usize) {
        while lock.waiter_count() != n {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn readers_share() {
        let lock = Arc::new(RwLock::new());
        lock.read().unwrap();
        let other = Arc::clone(&lock);
        std::thread::spawn(move || {
            other.try_read().unwrap();
            assert_eq!(other.reader_count(), 2);
            other.unlock().unwrap();
        })
        .join()
        .unwrap();
        assert_eq!(lock.reader_count(), 1);
        lock.unlock().unwrap();
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    fn writer_excludes_everyone() {
        let lock = Arc::new(RwLock::new());
        lock.write().unwrap();
        let other = Arc::clone(&lock);
        let (r, w) = std::thread::spawn(move || (other.try_read(), other.try_write()))
            .join()
            .unwrap();
        assert_eq!(r, Err(Error::Busy));
        assert_eq!(w, Err(Error::Busy));
        lock.unlock().unwrap();
    }

    #[test]
    fn self_deadlocks_are_reported() {
        let lock = RwLock::new();
        lock.write().unwrap();
        assert_eq!(lock.read(), Err(Error::Deadlock));
        assert_eq!(lock.write(), Err(Error::Deadlock));
        lock.unlock().unwrap();

        lock.read().unwrap();
        assert_eq!(lock.try_write(), Err(Error::Deadlock));
        lock.read().unwrap();
        assert_eq!(lock.reader_count(), 2);
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        assert_eq!(lock.unlock(), Err(Error::NotOwner));
    }

    #[test]
    fn release_grants_reader_batch_up_to_writer() {
        let lock = Arc::new(RwLock::new());
        lock.write().unwrap();

        let spawn = |write: bool| {
            let lock = Arc::clone(&lock);
            crate::thread::spawn("rw", 100, move || {
                if write {
                    lock.write().unwrap();
                } else {
                    lock.read().unwrap();
                }
                let snapshot = (lock.reader_count(), lock.is_write_locked());
                std::thread::sleep(Duration::from_millis(20));
                lock.unlock().unwrap();
                snapshot
            })
            .unwrap()
        };

        let r1 = spawn(false);
        wait_for_waiters(&lock, 1);
        let r2 = spawn(false);
        wait_for_waiters(&lock, 2);
        let w = spawn(true);
        wait_for_waiters(&lock, 3);

        lock.unlock().unwrap();
        let (readers1, _) = r1.join().unwrap();
        let (readers2, _) = r2.join().unwrap();
        assert!(readers1 >= 1 && readers2 >= 1);
        let (readers, write_locked) = w.join().unwrap();
        assert_eq!(readers, 0);
        assert!(write_locked);
    }

    #[test]
    fn timed_write_times_out_while_read_held() {
        let lock = Arc::new(RwLock::new());
        lock.read().unwrap();
        let other = Arc::clone(&lock);
        let result = std::thread::spawn(move || {
            let at = crate::clock::monotonic_now() + Duration::from_millis(20);
            other.clock_write(CLOCK_MONOTONIC, Some(&at))
        })
        .join()
        .unwrap();
        assert_eq!(result, Err(Error::TimedOut));
        assert_eq!(lock.waiter_count(), 0);
        assert_eq!(lock.clock_read(99, Some(&Timespec::ZERO)), Err(Error::InvalidArgs));
        lock.unlock().unwrap();
    }

    #[test]
    fn destroy_rules() {
        let lock = RwLock::new();
        lock.read().unwrap();
        assert_eq!(lock.destroy(), Err(Error::Busy));
        lock.unlock().unwrap();
        assert_eq!(lock.destroy(), Ok(()));
        assert_eq!(lock.read(), Err(Error::InvalidObject));
    }
}
