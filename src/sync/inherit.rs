// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Priority Inheritance
//!
//! A thread that owns an inheriting queue runs at no less than the highest
//! effective priority of that queue's waiters. Because a boosted owner may
//! itself be blocked on another inheriting queue, a boost is carried along
//! the chain of owners.
//!
//! # Design
//!
//! - **Explicit graph**: waiter edges are `Thread::blocked_on`, owner edges
//!   are the queue's owner binding plus `Thread::owned`
//! - **Recompute, don't diff**: a thread's effective priority is always
//!   `max(base, top waiter of every inheriting queue it owns)`, so boosts
//!   and reverts are the same operation
//! - **Bounded walk**: the chain walk stops when a priority does not change,
//!   at a non-inheriting queue, or after `inherit_max_depth` owner hops.
//!   Deadlock cycles are therefore safe to walk
//!
//! Every function here requires the thread lock.

use crate::config::{self, TraceFlags};
use crate::debug::trace_enabled;
use crate::sync::wait_queue::QueueCore;
use crate::thread::Thread;
use crate::thread_lock::ThreadLockGuard;
use crate::types::Priority;
use std::sync::Arc;

/// Priority `thread` should run at given what it owns
pub(crate) fn effective_priority(_tl: &ThreadLockGuard, thread: &Thread) -> Priority {
    let owned: Vec<Arc<QueueCore>> = thread.sched.lock().owned.clone();
    owned
        .iter()
        .filter_map(|queue| queue.top_priority())
        .fold(thread.base_priority(), Priority::max)
}

/// Recompute `thread`'s effective priority
///
/// # Returns
///
/// `true` if it changed
fn refresh(tl: &ThreadLockGuard, thread: &Thread) -> bool {
    let target = effective_priority(tl, thread);
    let previous = thread.set_effective_priority(target);
    if previous != target {
        log_trace_if!(
            trace_enabled(TraceFlags::INHERIT),
            "tid {}: effective priority {} -> {}",
            thread.tid(),
            previous,
            target
        );
    }
    previous != target
}

/// Owner of the inheriting queue `thread` is blocked on
fn next_owner(thread: &Thread) -> Option<Arc<Thread>> {
    let queue = thread
        .sched
        .lock()
        .blocked_on
        .as_ref()
        .map(|link| Arc::clone(&link.queue))?;
    if !queue.inherits() {
        return None;
    }
    queue.owner()
}

/// Recompute `thread`'s effective priority and carry any change along the
/// chain of owners it is blocked behind
pub(crate) fn update(tl: &ThreadLockGuard, thread: &Arc<Thread>) {
    let max_depth = config::get().inherit_max_depth;
    let mut cursor = Arc::clone(thread);
    let mut hops = 0;

    while refresh(tl, &cursor) {
        if hops >= max_depth {
            log_debug!(
                "priority inheritance stopped at tid {} after {} hops",
                cursor.tid(),
                hops
            );
            break;
        }
        match next_owner(&cursor) {
            Some(owner) => cursor = owner,
            None => break,
        }
        hops += 1;
    }
}

/// Rebind the owner of `queue`, moving inherited priority with it
pub(crate) fn transfer(tl: &ThreadLockGuard, queue: &Arc<QueueCore>, owner: Option<Arc<Thread>>) {
    let previous = queue.replace_owner(owner.clone());
    if !queue.inherits() {
        return;
    }

    if let Some(previous) = previous {
        previous
            .sched
            .lock()
            .owned
            .retain(|q| !Arc::ptr_eq(q, queue));
        update(tl, &previous);
    }
    if let Some(owner) = owner {
        owner.sched.lock().owned.push(Arc::clone(queue));
        update(tl, &owner);
    }
}
