// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Wait Queue
//!
//! The thread queue engine shared by every blocking primitive. A wait
//! queue holds the threads blocked on one object and decides which of
//! them is woken next.
//!
//! # Design
//!
//! - **Priority-ordered**: the highest effective priority is selected
//!   first, FIFO within the same priority (or pure FIFO, fixed at
//!   construction)
//! - **Selection at dequeue time**: priorities may change while threads
//!   wait (inheritance, `set_priority`), so the order is evaluated when a
//!   thread is picked rather than when it is inserted
//! - **Single outcome**: every removal happens under the thread lock; the
//!   first of dequeue, timeout or interrupt to remove a waiter decides its
//!   [`WakeReason`], and the waiter's timer is cancelled on the spot
//! - **Lazy storage**: queues are `const`-constructible; shared state is
//!   allocated on first use
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::sync::wait_queue::{Discipline, WaitQueue, WakeReason};
//! use rustux_sync::thread::BlockReason;
//! use std::sync::Arc;
//!
//! let wq = Arc::new(WaitQueue::new(Discipline::Priority, BlockReason::Other));
//! let waiter = {
//!     let wq = Arc::clone(&wq);
//!     std::thread::spawn(move || wq.block((), 0, None))
//! };
//! while wq.is_empty() {
//!     std::thread::yield_now();
//! }
//! assert!(wq.dequeue_one().is_some());
//! assert_eq!(waiter.join().unwrap(), WakeReason::Satisfied);
//! ```

use crate::clock::Deadline;
use crate::config::TraceFlags;
use crate::debug::trace_enabled;
use crate::sched;
use crate::sync::inherit;
use crate::thread::{BlockReason, Thread, ThreadState, WaitLink};
use crate::thread_lock::{thread_lock, ThreadLockGuard};
use crate::timer::TimerHandle;
use crate::types::{Priority, Tid};
use std::fmt;
use std::sync::{Arc, Weak};

/// ============================================================================
/// Queue Types
/// ============================================================================

/// Order in which waiters are selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discipline {
    /// Arrival order only
    Fifo,

    /// Highest effective priority first, arrival order within a priority
    #[default]
    Priority,
}

/// Why a blocked thread resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Dequeued by the object (ownership, unit or signal delivered)
    Satisfied,

    /// Deadline passed first
    TimedOut,

    /// Removed by an asynchronous interruption
    Interrupted,
}

/// One blocked thread
struct Waiter {
    thread: Arc<Thread>,

    /// Arrival sequence, unique within the queue
    seq: u64,

    /// Primitive-specific ordering key (e.g. reader or writer)
    tag: u32,

    /// Pending timeout, if the wait has a deadline
    timer: Option<TimerHandle>,
}

struct QueueInner {
    waiters: Vec<Waiter>,
    next_seq: u64,

    /// Inheritance binding: the thread that currently owns the object
    owner: Option<Arc<Thread>>,
}

impl QueueInner {
    /// Index of the waiter that would be woken next
    fn select(&self, discipline: Discipline) -> Option<usize> {
        match discipline {
            Discipline::Fifo => (!self.waiters.is_empty()).then_some(0),
            Discipline::Priority => self
                .waiters
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.thread
                        .priority()
                        .cmp(&b.thread.priority())
                        .then(b.seq.cmp(&a.seq))
                })
                .map(|(index, _)| index),
        }
    }

    /// Waiters sorted in selection order
    fn sort(waiters: &mut [Waiter], discipline: Discipline) {
        if discipline == Discipline::Priority {
            waiters.sort_by(|a, b| {
                b.thread
                    .priority()
                    .cmp(&a.thread.priority())
                    .then(a.seq.cmp(&b.seq))
            });
        }
    }
}

/// Shared queue state
///
/// Thread records and pending timers refer to the queue through this
/// core, so it outlives any single borrow of the owning object.
pub(crate) struct QueueCore {
    discipline: Discipline,
    inherit: bool,
    reason: BlockReason,
    inner: spin::Mutex<QueueInner>,
}

impl QueueCore {
    pub(crate) fn inherits(&self) -> bool {
        self.inherit
    }

    pub(crate) fn owner(&self) -> Option<Arc<Thread>> {
        self.inner.lock().owner.clone()
    }

    pub(crate) fn replace_owner(&self, owner: Option<Arc<Thread>>) -> Option<Arc<Thread>> {
        std::mem::replace(&mut self.inner.lock().owner, owner)
    }

    /// Highest effective priority among the waiters
    pub(crate) fn top_priority(&self) -> Option<Priority> {
        self.inner
            .lock()
            .waiters
            .iter()
            .map(|w| w.thread.priority())
            .max()
    }

    /// Remove the waiter with arrival sequence `seq` and wake it
    fn remove_seq(self: &Arc<Self>, tl: &ThreadLockGuard, seq: u64, reason: WakeReason) -> bool {
        let waiter = {
            let mut inner = self.inner.lock();
            match inner.waiters.iter().position(|w| w.seq == seq) {
                Some(index) => inner.waiters.remove(index),
                None => return false,
            }
        };
        self.finish(tl, waiter, reason);
        true
    }

    /// Complete the wait of a waiter already detached from the queue
    fn finish(self: &Arc<Self>, tl: &ThreadLockGuard, mut waiter: Waiter, reason: WakeReason) {
        if let Some(timer) = waiter.timer.take() {
            timer.cancel();
        }
        {
            let mut sched = waiter.thread.sched.lock();
            sched.blocked_on = None;
            sched.state = ThreadState::Running;
            sched.block_reason = BlockReason::None;
        }
        if self.inherit {
            if let Some(owner) = self.owner() {
                inherit::update(tl, &owner);
            }
        }
        log_trace_if!(
            trace_enabled(TraceFlags::QUEUE),
            "wq {:p}: wake tid {} ({:?})",
            Arc::as_ptr(self),
            waiter.thread.tid(),
            reason
        );
        sched::wake(&waiter.thread, reason);
    }
}

/// ============================================================================
/// Wait Queue
/// ============================================================================

/// Queue of threads blocked on one object
pub struct WaitQueue {
    discipline: Discipline,
    inherit: bool,
    reason: BlockReason,
    core: spin::Once<Arc<QueueCore>>,
}

impl WaitQueue {
    /// Create a queue without priority inheritance
    pub const fn new(discipline: Discipline, reason: BlockReason) -> Self {
        Self {
            discipline,
            inherit: false,
            reason,
            core: spin::Once::new(),
        }
    }

    /// Create a priority-ordered queue whose owner inherits waiter priority
    pub const fn with_inheritance(reason: BlockReason) -> Self {
        Self {
            discipline: Discipline::Priority,
            inherit: true,
            reason,
            core: spin::Once::new(),
        }
    }

    fn core(&self) -> &Arc<QueueCore> {
        self.core.call_once(|| {
            Arc::new(QueueCore {
                discipline: self.discipline,
                inherit: self.inherit,
                reason: self.reason,
                inner: spin::Mutex::new(QueueInner {
                    waiters: Vec::new(),
                    next_seq: 0,
                    owner: None,
                }),
            })
        })
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    pub fn inherits(&self) -> bool {
        self.inherit
    }

    /// Number of blocked threads
    pub fn len(&self) -> usize {
        let Some(core) = self.core.get() else {
            return 0;
        };
        let _tl = thread_lock();
        let len = core.inner.lock().waiters.len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Thread IDs of the waiters in the order they would be woken
    pub fn waiter_tids(&self) -> Vec<Tid> {
        let Some(core) = self.core.get() else {
            return Vec::new();
        };
        let _tl = thread_lock();
        let inner = core.inner.lock();
        let mut order: Vec<(Priority, u64, Tid)> = inner
            .waiters
            .iter()
            .map(|w| (w.thread.priority(), w.seq, w.thread.tid()))
            .collect();
        if self.discipline == Discipline::Priority {
            order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        }
        order.into_iter().map(|(_, _, tid)| tid).collect()
    }

    /// Queue the calling thread
    ///
    /// The caller is recorded as a waiter and, if `deadline` is given, its
    /// timeout is armed. The caller then releases whatever protects the
    /// object and calls [`Blocker::wait`]; a wake issued in between is not
    /// lost.
    ///
    /// # Arguments
    ///
    /// * `tag` - Primitive-specific key returned by [`dequeue_one_if`](Self::dequeue_one_if)
    /// * `deadline` - Optional absolute timeout
    pub fn enqueue(&self, tag: u32, deadline: Option<&Deadline>) -> Blocker {
        let core = Arc::clone(self.core());
        let current = Thread::current();
        let tl = thread_lock();

        current.take_wake();
        let seq = {
            let mut inner = core.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.waiters.push(Waiter {
                thread: Arc::clone(&current),
                seq,
                tag,
                timer: None,
            });
            seq
        };
        {
            let mut sched = current.sched.lock();
            debug_assert!(sched.blocked_on.is_none(), "thread queued twice");
            sched.blocked_on = Some(WaitLink {
                queue: Arc::clone(&core),
                seq,
            });
            sched.state = ThreadState::Blocked;
            sched.block_reason = core.reason;
        }

        if core.inherit {
            if let Some(owner) = core.owner() {
                inherit::update(&tl, &owner);
            }
        }

        if let Some(deadline) = deadline {
            let queue = Arc::downgrade(&core);
            let handle = deadline.arm(Box::new(move || expire(&queue, seq)));
            if let Some(waiter) = core.inner.lock().waiters.iter_mut().find(|w| w.seq == seq) {
                waiter.timer = Some(handle);
            }
        }

        log_trace_if!(
            trace_enabled(TraceFlags::QUEUE),
            "wq {:p}: enqueue tid {} prio {} tag {} deadline {:?}",
            Arc::as_ptr(&core),
            current.tid(),
            current.priority(),
            tag,
            deadline
        );

        drop(tl);
        Blocker {
            thread: current,
            queue: core,
            seq,
            finished: false,
        }
    }

    /// Queue the calling thread, release `guard`, and sleep until woken
    pub fn block<G>(&self, guard: G, tag: u32, deadline: Option<&Deadline>) -> WakeReason {
        let blocker = self.enqueue(tag, deadline);
        drop(guard);
        blocker.wait()
    }

    /// Wake the next waiter with [`WakeReason::Satisfied`]
    ///
    /// # Returns
    ///
    /// The woken thread, or `None` if the queue was empty
    pub fn dequeue_one(&self) -> Option<Arc<Thread>> {
        self.dequeue_one_if(|_| true).map(|(thread, _)| thread)
    }

    /// Wake the next waiter only if `accept` approves its tag
    ///
    /// `accept` runs with queue bookkeeping locked and must not block.
    pub fn dequeue_one_if(&self, accept: impl FnOnce(u32) -> bool) -> Option<(Arc<Thread>, u32)> {
        let core = self.core.get()?;
        let tl = thread_lock();
        let waiter = {
            let mut inner = core.inner.lock();
            let index = inner.select(core.discipline)?;
            if !accept(inner.waiters[index].tag) {
                return None;
            }
            inner.waiters.remove(index)
        };
        let woken = (Arc::clone(&waiter.thread), waiter.tag);
        core.finish(&tl, waiter, WakeReason::Satisfied);
        Some(woken)
    }

    /// Wake every waiter with [`WakeReason::Satisfied`], in selection order
    pub fn dequeue_all(&self) -> Vec<Arc<Thread>> {
        let Some(core) = self.core.get() else {
            return Vec::new();
        };
        let tl = thread_lock();
        let mut waiters = std::mem::take(&mut core.inner.lock().waiters);
        QueueInner::sort(&mut waiters, core.discipline);

        let mut woken = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            woken.push(Arc::clone(&waiter.thread));
            core.finish(&tl, waiter, WakeReason::Satisfied);
        }
        woken
    }

    /// Remove `thread` from this queue with the given reason
    ///
    /// # Returns
    ///
    /// `false` if the thread is not blocked on this queue
    pub fn cancel(&self, thread: &Arc<Thread>, reason: WakeReason) -> bool {
        let Some(core) = self.core.get() else {
            return false;
        };
        let tl = thread_lock();
        let seq = match &thread.sched.lock().blocked_on {
            Some(link) if Arc::ptr_eq(&link.queue, core) => link.seq,
            _ => return false,
        };
        core.remove_seq(&tl, seq, reason)
    }

    /// Thread bound as the owner of this queue
    pub fn owner(&self) -> Option<Arc<Thread>> {
        let core = self.core.get()?;
        let _tl = thread_lock();
        let owner = core.owner();
        owner
    }

    /// Rebind the owner of this queue
    ///
    /// For inheriting queues this moves the waiters' priority from the
    /// previous owner to the new one.
    pub fn set_owner(&self, owner: Option<Arc<Thread>>) {
        let core = self.core();
        let tl = thread_lock();
        inherit::transfer(&tl, core, owner);
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("discipline", &self.discipline)
            .field("inherit", &self.inherit)
            .field("waiters", &self.len())
            .finish()
    }
}

/// Remove `thread` from whatever queue it is blocked on
///
/// # Returns
///
/// `true` if the thread was blocked
pub fn cancel(thread: &Arc<Thread>, reason: WakeReason) -> bool {
    let tl = thread_lock();
    let link = thread
        .sched
        .lock()
        .blocked_on
        .as_ref()
        .map(|link| (Arc::clone(&link.queue), link.seq));
    match link {
        Some((queue, seq)) => queue.remove_seq(&tl, seq, reason),
        None => false,
    }
}

/// Timer callback for a waiter's deadline
fn expire(queue: &Weak<QueueCore>, seq: u64) {
    let Some(core) = queue.upgrade() else {
        return;
    };
    let tl = thread_lock();
    core.remove_seq(&tl, seq, WakeReason::TimedOut);
}

/// ============================================================================
/// Blocker
/// ============================================================================

/// A queued wait that has not been slept on yet
///
/// Dropping it without calling [`wait`](Self::wait) withdraws the thread
/// from the queue.
#[must_use = "a queued thread must wait for its wake"]
pub struct Blocker {
    thread: Arc<Thread>,
    queue: Arc<QueueCore>,
    seq: u64,
    finished: bool,
}

impl Blocker {
    /// Sleep until dequeued, timed out or interrupted
    pub fn wait(mut self) -> WakeReason {
        let reason = sched::block_current(&self.thread);
        self.finished = true;
        reason
    }
}

impl Drop for Blocker {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        {
            let tl = thread_lock();
            self.queue.remove_seq(&tl, self.seq, WakeReason::Interrupted);
        }
        self.thread.take_wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSelector;
    use crate::thread;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    fn wait_for_len(wq: &WaitQueue, n: usize) {
        let start = Instant::now();
        while wq.len() != n {
            assert!(start.elapsed() < Duration::from_secs(5), "queue never reached {}", n);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Block a new thread on `wq`, returning once it is queued
    fn park_on(wq: &Arc<WaitQueue>, priority: Priority) -> (Tid, JoinHandle<WakeReason>) {
        let before = wq.len();
        let (tx, rx) = std::sync::mpsc::channel();
        let queue = Arc::clone(wq);
        let handle = thread::spawn("waiter", priority, move || {
            tx.send(Thread::current().tid()).unwrap();
            queue.block((), 0, None)
        })
        .unwrap();
        let tid = rx.recv().unwrap();
        wait_for_len(wq, before + 1);
        (tid, handle)
    }

    #[test]
    fn priority_order_with_fifo_ties() {
        let wq = Arc::new(WaitQueue::new(Discipline::Priority, BlockReason::Other));
        let (low, h1) = park_on(&wq, 10);
        let (high_a, h2) = park_on(&wq, 30);
        let (mid, h3) = park_on(&wq, 20);
        let (high_b, h4) = park_on(&wq, 30);

        assert_eq!(wq.waiter_tids(), vec![high_a, high_b, mid, low]);

        let mut order = Vec::new();
        while let Some(thread) = wq.dequeue_one() {
            order.push(thread.tid());
        }
        assert_eq!(order, vec![high_a, high_b, mid, low]);
        for h in [h1, h2, h3, h4] {
            assert_eq!(h.join().unwrap(), WakeReason::Satisfied);
        }
    }

    #[test]
    fn fifo_ignores_priority() {
        let wq = Arc::new(WaitQueue::new(Discipline::Fifo, BlockReason::Other));
        let (first, h1) = park_on(&wq, 10);
        let (second, h2) = park_on(&wq, 250);

        let woken: Vec<Tid> = wq.dequeue_all().iter().map(|t| t.tid()).collect();
        assert_eq!(woken, vec![first, second]);
        assert_eq!(h1.join().unwrap(), WakeReason::Satisfied);
        assert_eq!(h2.join().unwrap(), WakeReason::Satisfied);
        assert!(wq.is_empty());
    }

    #[test]
    fn deadline_times_out_and_leaves_queue() {
        let wq = WaitQueue::new(Discipline::Priority, BlockReason::Other);
        let deadline = Deadline::after(ClockSelector::Monotonic, Duration::from_millis(20));
        let start = Instant::now();
        assert_eq!(wq.block((), 0, Some(&deadline)), WakeReason::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(19));
        assert!(wq.is_empty());
        assert!(!Thread::current().is_blocked());
    }

    #[test]
    fn interrupt_removes_waiter() {
        let wq = Arc::new(WaitQueue::new(Discipline::Priority, BlockReason::Other));
        let (_, handle) = park_on(&wq, 50);
        let target = wq.dequeue_one_if(|_| false);
        assert!(target.is_none());

        let woken = {
            let _tl = thread_lock();
            let core = wq.core.get().unwrap();
            let inner = core.inner.lock();
            Arc::clone(&inner.waiters[0].thread)
        };
        assert!(woken.interrupt());
        assert_eq!(handle.join().unwrap(), WakeReason::Interrupted);
        assert!(wq.is_empty());
        assert!(!wq.cancel(&woken, WakeReason::Interrupted));
    }

    #[test]
    fn dropped_blocker_withdraws() {
        let wq = WaitQueue::new(Discipline::Fifo, BlockReason::Other);
        let blocker = wq.enqueue(7, None);
        assert_eq!(wq.len(), 1);
        assert!(Thread::current().is_blocked());
        drop(blocker);
        assert!(wq.is_empty());
        assert!(!Thread::current().is_blocked());
        assert!(Thread::current().take_wake().is_none());
    }

    #[test]
    fn tag_filter_leaves_head_in_place() {
        let wq = Arc::new(WaitQueue::new(Discipline::Fifo, BlockReason::Other));
        let queue = Arc::clone(&wq);
        let handle = std::thread::spawn(move || queue.block((), 2, None));
        wait_for_len(&wq, 1);

        assert!(wq.dequeue_one_if(|tag| tag == 1).is_none());
        assert_eq!(wq.len(), 1);
        let (_, tag) = wq.dequeue_one_if(|tag| tag == 2).unwrap();
        assert_eq!(tag, 2);
        assert_eq!(handle.join().unwrap(), WakeReason::Satisfied);
    }
}
