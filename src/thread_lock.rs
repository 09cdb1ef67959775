// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Lock
//!
//! The global lock serializing every wait queue mutation and every
//! priority inheritance update. Holding it is the equivalent of running
//! with preemption disabled: whoever removes a waiter from its queue
//! under this lock decides that waiter's wake reason.
//!
//! Functions that require the lock take a `&ThreadLockGuard` as proof.
//!
//! Lock order: object state lock, then the thread lock, then per-queue and
//! per-thread bookkeeping locks, then the timer lock. Bookkeeping locks
//! nest only under the thread lock; read-only queries may take them alone.

/// Global thread lock
static THREAD_LOCK: spin::Mutex<()> = spin::Mutex::new(());

/// Proof that the thread lock is held
pub struct ThreadLockGuard {
    _guard: spin::MutexGuard<'static, ()>,
}

/// Acquire the thread lock
pub fn thread_lock() -> ThreadLockGuard {
    ThreadLockGuard {
        _guard: THREAD_LOCK.lock(),
    }
}
