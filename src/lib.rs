// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux Sync - Real-Time Thread Synchronization Core
//!
//! Blocking synchronization for threads with fixed priorities: wait queues,
//! transitive priority inheritance, and the mutex, condition variable,
//! reader-writer lock and semaphore built on top of them.
//!
//! # Design
//!
//! - **One queue engine**: every primitive blocks its waiters in a
//!   [`WaitQueue`], which orders them by effective priority (FIFO within a
//!   priority) and settles each wait with exactly one [`WakeReason`]
//! - **One global lock**: queue and inheritance updates are serialized by
//!   the thread lock, so a timeout and a wake can never both win
//! - **Two clocks**: deadlines are absolute on either the monotonic or the
//!   wall clock; a wall clock step re-evaluates pending timeouts
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::{Condvar, Mutex};
//! use std::sync::Arc;
//!
//! let pair = Arc::new((Mutex::new(), Condvar::new()));
//! let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
//!
//! let (p, r) = (Arc::clone(&pair), Arc::clone(&ready));
//! let waiter = std::thread::spawn(move || {
//!     let (mutex, cv) = &*p;
//!     mutex.lock().unwrap();
//!     while !r.load(std::sync::atomic::Ordering::Acquire) {
//!         cv.wait(mutex).unwrap();
//!     }
//!     mutex.unlock().unwrap();
//! });
//!
//! let (mutex, cv) = &*pair;
//! mutex.lock().unwrap();
//! ready.store(true, std::sync::atomic::Ordering::Release);
//! cv.signal().unwrap();
//! mutex.unlock().unwrap();
//! waiter.join().unwrap();
//! ```

// Logging macros must come first so every module can use them
#[macro_use]
mod debug;

pub mod clock;
pub mod config;
pub mod errors;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod thread_lock;
pub mod timer;
pub mod types;

// Re-exports
pub use clock::{ClockSelector, Deadline};
pub use errors::{Error, Result, Status};
pub use sync::{
    Condvar, CondvarAttr, Discipline, Mutex, MutexAttr, MutexGuard, MutexKind, Protocol, RwLock,
    Semaphore, WaitQueue, WakeReason, SEM_VALUE_MAX,
};
pub use thread::Thread;
pub use types::{ClockId, Priority, Tid, Timespec, CLOCK_MONOTONIC, CLOCK_REALTIME};
