// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Records
//!
//! Every host thread that touches a synchronization primitive gets a
//! [`Thread`] record on first use. The record carries what the
//! synchronization core needs from a scheduler: identity, base and
//! effective priority, the queue the thread is blocked on, and the
//! inheriting queues it owns.
//!
//! # Design
//!
//! - Each thread has a unique thread ID (TID); TID 0 is never issued
//! - Base priority is set by the application; effective priority is the
//!   base raised by priority inheritance
//! - Blocking edges (`blocked_on`, `owned`) are only touched under the
//!   thread lock
//!
//! # Thread States
//!
//! ```text
//! Running -> Blocked -> Running
//! ```
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::thread::{self, Thread};
//!
//! let handle = thread::spawn("worker", 200, || Thread::current().priority()).unwrap();
//! assert_eq!(handle.join().unwrap(), 200);
//! ```

use crate::config;
use crate::sync::inherit;
use crate::sync::wait_queue::{self, QueueCore, WakeReason};
use crate::thread_lock::thread_lock;
use crate::types::{Priority, Tid};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// ============================================================================
/// Thread ID
/// ============================================================================

pub use crate::types::TID_INVALID;

/// Global thread ID allocator
static TID_ALLOCATOR: TidAllocator = TidAllocator::new();

/// Thread ID allocator
struct TidAllocator {
    next: AtomicU64,
}

impl TidAllocator {
    const fn new() -> Self {
        Self {
            next: AtomicU64::new(1), // TID 0 is reserved/invalid
        }
    }

    fn allocate(&self) -> Tid {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// ============================================================================
/// Thread State
/// ============================================================================

/// Thread state as seen by the synchronization core
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is runnable
    Running = 0,

    /// Thread is suspended in a wait queue
    Blocked = 1,
}

/// Kind of object a blocked thread is waiting on
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    None = 0,
    Mutex = 1,
    CondVar = 2,
    RwLock = 3,
    Semaphore = 4,
    Other = 5,
}

/// Waiter edge: the queue a thread is blocked on and its entry sequence
pub(crate) struct WaitLink {
    pub(crate) queue: Arc<QueueCore>,
    pub(crate) seq: u64,
}

/// Scheduling bookkeeping, guarded by the thread lock
pub(crate) struct SchedInfo {
    pub(crate) state: ThreadState,
    pub(crate) block_reason: BlockReason,
    pub(crate) blocked_on: Option<WaitLink>,

    /// Inheriting queues this thread currently owns
    pub(crate) owned: Vec<Arc<QueueCore>>,
}

/// ============================================================================
/// Thread
/// ============================================================================

/// Synchronization view of a thread
pub struct Thread {
    tid: Tid,
    name: Option<String>,
    host: std::thread::Thread,
    base_priority: AtomicU8,
    effective_priority: AtomicU8,

    /// Wake reason posted by whoever dequeued this thread
    wake: spin::Mutex<Option<WakeReason>>,

    pub(crate) sched: spin::Mutex<SchedInfo>,
}

thread_local! {
    static CURRENT: Arc<Thread> = Arc::new(Thread::for_host_thread());
}

impl Thread {
    fn for_host_thread() -> Self {
        let host = std::thread::current();
        let priority = config::get().default_priority;
        let thread = Self {
            tid: TID_ALLOCATOR.allocate(),
            name: host.name().map(str::to_string),
            host,
            base_priority: AtomicU8::new(priority),
            effective_priority: AtomicU8::new(priority),
            wake: spin::Mutex::new(None),
            sched: spin::Mutex::new(SchedInfo {
                state: ThreadState::Running,
                block_reason: BlockReason::None,
                blocked_on: None,
                owned: Vec::new(),
            }),
        };
        log_trace!("thread {} ({:?}) registered", thread.tid, thread.name);
        thread
    }

    /// Record of the calling thread
    pub fn current() -> Arc<Thread> {
        CURRENT.with(Arc::clone)
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Priority set by the application
    pub fn base_priority(&self) -> Priority {
        self.base_priority.load(Ordering::Acquire)
    }

    /// Priority including inheritance boosts
    pub fn priority(&self) -> Priority {
        self.effective_priority.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ThreadState {
        self.sched.lock().state
    }

    pub fn block_reason(&self) -> BlockReason {
        self.sched.lock().block_reason
    }

    pub fn is_blocked(&self) -> bool {
        self.state() == ThreadState::Blocked
    }

    /// Change the base priority
    ///
    /// The effective priority is recomputed, and the change is carried to
    /// the owner of whatever inheriting queue this thread is blocked on.
    pub fn set_priority(self: &Arc<Self>, priority: Priority) {
        let tl = thread_lock();
        let old = self.base_priority.swap(priority, Ordering::AcqRel);
        log_debug!("thread {}: base priority {} -> {}", self.tid, old, priority);
        inherit::update(&tl, self);
    }

    /// Interrupt a blocked thread
    ///
    /// The thread leaves its queue with [`WakeReason::Interrupted`]. The
    /// primitive it was blocked in decides whether that is a retry or a
    /// spurious return.
    ///
    /// # Returns
    ///
    /// `true` if the thread was blocked
    pub fn interrupt(self: &Arc<Self>) -> bool {
        wait_queue::cancel(self, WakeReason::Interrupted)
    }

    /// Store a new effective priority, returning the previous one
    pub(crate) fn set_effective_priority(&self, priority: Priority) -> Priority {
        self.effective_priority.swap(priority, Ordering::AcqRel)
    }

    pub(crate) fn post_wake(&self, reason: WakeReason) {
        *self.wake.lock() = Some(reason);
    }

    pub(crate) fn take_wake(&self) -> Option<WakeReason> {
        self.wake.lock().take()
    }

    pub(crate) fn host(&self) -> &std::thread::Thread {
        &self.host
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("base_priority", &self.base_priority())
            .field("priority", &self.priority())
            .finish()
    }
}

/// Spawn a host thread that starts at `priority`
pub fn spawn<F, T>(name: &str, priority: Priority, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            Thread::current().set_priority(priority);
            f()
        })
}
