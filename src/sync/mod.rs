// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synchronization Primitives
//!
//! Blocking primitives built on the shared wait queue engine.
//!
//! # Primitives
//!
//! - **Mutex**: Exclusive ownership with optional recursion and priority
//!   inheritance
//! - **Condvar**: Wait for a condition while atomically releasing a mutex
//! - **RwLock**: Shared readers or one exclusive writer
//! - **Semaphore**: Counting semaphore
//! - **Wait Queue**: Queue for threads waiting on an object
//!
//! # Design
//!
//! Every primitive has a validity tag, an internal spin-locked state and an
//! embedded [`WaitQueue`]. Statically constructed objects (`const fn new`)
//! initialize themselves on first use; destroyed objects reject every
//! operation with `InvalidObject`. Each blocking operation comes in four
//! shapes: immediate try, blocking, timed on the object's default clock, and
//! timed on an explicit clock.

pub mod condvar;
pub(crate) mod inherit;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod wait_queue;

// Re-exports
pub use condvar::{Condvar, CondvarAttr};
pub use mutex::{Mutex, MutexAttr, MutexGuard, MutexKind, Protocol};
pub use rwlock::RwLock;
pub use semaphore::{Semaphore, SEM_VALUE_MAX};
pub use wait_queue::{Blocker, Discipline, WaitQueue, WakeReason};

use crate::errors::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};

/// ============================================================================
/// Object Validity Tag
/// ============================================================================

/// Tag of a statically constructed object that has not been used yet
const MAGIC_AUTO_INIT: u32 = 0x4155_544F; // "AUTO" in hex

/// Tag of a destroyed object
const MAGIC_DESTROYED: u32 = 0x4445_4144; // "DEAD" in hex

/// Validity tag embedded in every primitive
pub(crate) struct ObjectTag(AtomicU32);

impl ObjectTag {
    /// Tag for a statically constructed object
    pub(crate) const fn auto() -> Self {
        Self(AtomicU32::new(MAGIC_AUTO_INIT))
    }

    /// Tag for an explicitly initialized object
    pub(crate) const fn valid(magic: u32) -> Self {
        Self(AtomicU32::new(magic))
    }

    /// Check the tag, completing auto-initialization on first use
    pub(crate) fn validate(&self, magic: u32) -> Result<()> {
        match self.0.load(Ordering::Acquire) {
            tag if tag == magic => Ok(()),
            MAGIC_AUTO_INIT => {
                match self
                    .0
                    .compare_exchange(MAGIC_AUTO_INIT, magic, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {
                        log_trace!("object {:p} auto-initialized (magic {:#x})", self, magic);
                        Ok(())
                    }
                    Err(tag) if tag == magic => Ok(()),
                    Err(_) => Err(Error::InvalidObject),
                }
            }
            _ => Err(Error::InvalidObject),
        }
    }

    pub(crate) fn destroy(&self) {
        self.0.store(MAGIC_DESTROYED, Ordering::Release);
    }
}
