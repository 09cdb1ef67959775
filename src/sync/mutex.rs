// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Mutex
//!
//! Mutual exclusion lock that tracks its owning thread.
//!
//! # Design
//!
//! - **Ownership tracking**: Each mutex knows which thread owns it; only
//!   the owner may release it
//! - **Direct handoff**: release passes ownership straight to the waiter
//!   selected by the wait queue, so a woken thread never has to retry
//! - **Priority inheritance**: with [`Protocol::Inherit`] (the default) the
//!   owner runs at the priority of its most urgent waiter
//! - **Deadlock detection**: a thread relocking a non-recursive mutex it
//!   already owns gets `Deadlock` instead of hanging
//! - **Recursion**: [`MutexKind::Recursive`] counts nested acquisitions
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::sync::Mutex;
//!
//! static LOCK: Mutex = Mutex::new();
//!
//! LOCK.lock().unwrap();
//! // Critical section
//! LOCK.unlock().unwrap();
//!
//! // Or scoped
//! {
//!     let _guard = LOCK.guard().unwrap();
//! }
//! assert!(!LOCK.is_locked());
//! ```

use crate::clock::Deadline;
use crate::errors::{Error, Result};
use crate::sync::wait_queue::{Discipline, WaitQueue, WakeReason};
use crate::sync::ObjectTag;
use crate::thread::{BlockReason, Thread, TID_INVALID};
use crate::types::{ClockId, Tid, Timespec, CLOCK_REALTIME};
use core::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// ============================================================================
/// Mutex Attributes
/// ============================================================================

/// Magic number for mutex validation
const MUTEX_MAGIC: u32 = 0x4D55_5478; // "MUTx" in hex

/// Wait queue tag for lock waiters
const LOCK_WAITER: u32 = 0;

/// Behavior on relock by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutexKind {
    /// Relock by the owner fails with `Deadlock`
    #[default]
    Normal,

    /// Relock by the owner nests
    Recursive,
}

/// Priority protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Owner keeps its own priority
    None,

    /// Owner inherits the priority of its most urgent waiter
    #[default]
    Inherit,
}

/// Mutex attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttr {
    pub kind: MutexKind,
    pub protocol: Protocol,

    /// Waiter order; `Protocol::Inherit` always uses priority order
    pub discipline: Discipline,
}

impl MutexAttr {
    pub const DEFAULT: MutexAttr = MutexAttr {
        kind: MutexKind::Normal,
        protocol: Protocol::Inherit,
        discipline: Discipline::Priority,
    };

    pub const fn with_kind(mut self, kind: MutexKind) -> Self {
        self.kind = kind;
        self
    }

    pub const fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub const fn with_discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }
}

impl Default for MutexAttr {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// ============================================================================
/// Mutex
/// ============================================================================

struct MutexState {
    owner: Option<Arc<Thread>>,
    depth: u32,
}

/// Mutual exclusion lock
pub struct Mutex {
    tag: ObjectTag,
    kind: MutexKind,
    protocol: Protocol,

    /// Owner TID mirror for lock-free queries (0 = unlocked)
    owner_tid: AtomicU64,

    state: spin::Mutex<MutexState>,
    queue: WaitQueue,
}

impl Mutex {
    /// Create a statically initialized mutex with default attributes
    ///
    /// The mutex completes its initialization on first use.
    pub const fn new() -> Self {
        Self::build(ObjectTag::auto(), MutexAttr::DEFAULT)
    }

    /// Create an initialized mutex
    pub const fn with_attr(attr: MutexAttr) -> Self {
        Self::build(ObjectTag::valid(MUTEX_MAGIC), attr)
    }

    const fn build(tag: ObjectTag, attr: MutexAttr) -> Self {
        let queue = match attr.protocol {
            Protocol::Inherit => WaitQueue::with_inheritance(BlockReason::Mutex),
            Protocol::None => WaitQueue::new(attr.discipline, BlockReason::Mutex),
        };
        Self {
            tag,
            kind: attr.kind,
            protocol: attr.protocol,
            owner_tid: AtomicU64::new(TID_INVALID),
            state: spin::Mutex::new(MutexState {
                owner: None,
                depth: 0,
            }),
            queue,
        }
    }

    /// Initialize (or re-initialize after destroy) with new attributes
    ///
    /// # Returns
    ///
    /// `Busy` if the mutex is still held
    pub fn init(&mut self, attr: MutexAttr) -> Result<()> {
        if self.state.get_mut().owner.is_some() {
            return Err(Error::Busy);
        }
        *self = Self::with_attr(attr);
        Ok(())
    }

    /// Destroy the mutex
    ///
    /// # Returns
    ///
    /// `Busy` if the mutex is held or has waiters
    pub fn destroy(&self) -> Result<()> {
        self.validate()?;
        let state = self.state.lock();
        if state.owner.is_some() || !self.queue.is_empty() {
            return Err(Error::Busy);
        }
        self.tag.destroy();
        log_trace!("mutex {:p} destroyed", self);
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.tag.validate(MUTEX_MAGIC)
    }

    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Acquire the mutex without blocking
    ///
    /// # Returns
    ///
    /// `Busy` if another thread owns it
    pub fn try_lock(&self) -> Result<()> {
        self.validate()?;
        self.acquire(None, false)
    }

    /// Acquire the mutex, blocking as long as necessary
    pub fn lock(&self) -> Result<()> {
        self.validate()?;
        self.acquire(None, true)
    }

    /// Acquire the mutex with a wall-clock deadline
    pub fn timed_lock(&self, abstime: Option<&Timespec>) -> Result<()> {
        self.clock_lock(CLOCK_REALTIME, abstime)
    }

    /// Acquire the mutex with a deadline on the given clock
    ///
    /// The deadline is validated before anything else, even if the mutex is
    /// free.
    ///
    /// # Returns
    ///
    /// `InvalidArgs` for a missing deadline or unsupported clock, `TimedOut`
    /// if the deadline passes (immediately, if it already has)
    pub fn clock_lock(&self, clock_id: ClockId, abstime: Option<&Timespec>) -> Result<()> {
        self.validate()?;
        let deadline = Deadline::new(clock_id, abstime)?;
        self.acquire(Some(&deadline), true)
    }

    /// Acquire the mutex with an already validated deadline
    pub fn lock_until(&self, deadline: &Deadline) -> Result<()> {
        self.validate()?;
        self.acquire(Some(deadline), true)
    }

    /// Acquire the mutex and release it when the guard drops
    pub fn guard(&self) -> Result<MutexGuard<'_>> {
        self.lock()?;
        Ok(MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    fn acquire(&self, deadline: Option<&Deadline>, block: bool) -> Result<()> {
        let current = Thread::current();
        loop {
            let mut state = self.state.lock();
            match state.owner.as_ref().map(|owner| Arc::ptr_eq(owner, &current)) {
                None => {
                    self.grant(&mut state, &current);
                    return Ok(());
                }
                Some(true) => return self.relock(&mut state),
                Some(false) => {}
            }

            if !block {
                return Err(Error::Busy);
            }
            if deadline.is_some_and(Deadline::has_expired) {
                return Err(Error::TimedOut);
            }

            match self.queue.block(state, LOCK_WAITER, deadline) {
                WakeReason::Satisfied => {
                    // The releaser holds the state lock until the handoff is recorded
                    drop(self.state.lock());
                    return Ok(());
                }
                WakeReason::TimedOut => return Err(Error::TimedOut),
                WakeReason::Interrupted => {
                    log_trace!("mutex {:p}: tid {} interrupted, retrying", self, current.tid());
                }
            }
        }
    }

    fn grant(&self, state: &mut MutexState, thread: &Arc<Thread>) {
        state.owner = Some(Arc::clone(thread));
        state.depth = 1;
        self.owner_tid.store(thread.tid(), Ordering::Release);
        self.queue.set_owner(Some(Arc::clone(thread)));
    }

    fn relock(&self, state: &mut MutexState) -> Result<()> {
        match self.kind {
            MutexKind::Recursive => {
                state.depth = state.depth.checked_add(1).ok_or(Error::Overflow)?;
                Ok(())
            }
            MutexKind::Normal => Err(Error::Deadlock),
        }
    }

    /// Release the mutex
    ///
    /// # Returns
    ///
    /// `NotOwner` if the calling thread does not own the mutex
    pub fn unlock(&self) -> Result<()> {
        self.validate()?;
        let current = Thread::current();
        let mut state = self.state.lock();
        if !Self::owned_by(&state, &current) {
            return Err(Error::NotOwner);
        }
        if state.depth > 1 {
            state.depth -= 1;
            return Ok(());
        }
        self.release_locked(&mut state);
        Ok(())
    }

    /// Hand the mutex to the next waiter, or leave it unowned
    fn release_locked(&self, state: &mut MutexState) {
        match self.queue.dequeue_one() {
            Some(next) => {
                log_trace!("mutex {:p}: handoff to tid {}", self, next.tid());
                self.grant(state, &next);
            }
            None => {
                state.owner = None;
                state.depth = 0;
                self.owner_tid.store(TID_INVALID, Ordering::Release);
                self.queue.set_owner(None);
            }
        }
    }

    fn owned_by(state: &MutexState, thread: &Arc<Thread>) -> bool {
        state
            .owner
            .as_ref()
            .is_some_and(|owner| Arc::ptr_eq(owner, thread))
    }

    /// Fully release the mutex on behalf of a condition variable wait
    ///
    /// # Returns
    ///
    /// The recursion depth to restore on reacquisition
    pub(crate) fn release_for_wait(&self, current: &Arc<Thread>) -> Result<u32> {
        let mut state = self.state.lock();
        if !Self::owned_by(&state, current) {
            return Err(Error::NotOwner);
        }
        let depth = state.depth;
        self.release_locked(&mut state);
        Ok(depth)
    }

    /// Reacquire after a condition variable wait, restoring `depth`
    pub(crate) fn reacquire(&self, depth: u32) -> Result<()> {
        self.validate()?;
        self.acquire(None, true)?;
        self.state.lock().depth = depth;
        Ok(())
    }

    /// Check whether `thread` owns the mutex
    pub fn is_owned_by(&self, thread: &Arc<Thread>) -> bool {
        Self::owned_by(&self.state.lock(), thread)
    }

    /// Check if the mutex is currently locked
    pub fn is_locked(&self) -> bool {
        self.owner_tid.load(Ordering::Acquire) != TID_INVALID
    }

    /// Get the owner thread ID
    ///
    /// Returns None if unlocked.
    pub fn owner(&self) -> Option<Tid> {
        match self.owner_tid.load(Ordering::Acquire) {
            TID_INVALID => None,
            tid => Some(tid),
        }
    }

    /// Current recursion depth (0 when unlocked)
    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    /// Number of threads blocked on the mutex
    pub fn waiter_count(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex")
            .field("kind", &self.kind)
            .field("protocol", &self.protocol)
            .field("owner", &self.owner())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

/// ============================================================================
/// Mutex Guard (RAII)
/// ============================================================================

/// RAII guard for a mutex
///
/// Releases the mutex when dropped. Bound to the owning thread.
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    _not_send: PhantomData<*const ()>,
}

impl<'a> MutexGuard<'a> {
    /// The guarded mutex
    pub fn mutex(&self) -> &'a Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.unlock() {
            log_warn!("mutex {:p}: guard release failed: {}", self.mutex, err);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
