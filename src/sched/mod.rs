// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler Hooks
//!
//! The two operations the synchronization core needs from a scheduler:
//! suspend the calling thread until it is made ready, and make a blocked
//! thread ready. On a hosted target these map onto park/unpark of the
//! host thread.
//!
//! # Design
//!
//! - A wake posts a [`WakeReason`] before unparking, so a wake that lands
//!   before the target parks is never lost
//! - Stray unparks are absorbed: the sleeper only returns once a reason
//!   has been posted

use crate::sync::wait_queue::WakeReason;
use crate::thread::Thread;

/// Suspend the calling thread until a wake reason is posted for it
pub fn block_current(current: &Thread) -> WakeReason {
    loop {
        if let Some(reason) = current.take_wake() {
            return reason;
        }
        std::thread::park();
    }
}

/// Make `thread` ready with the given reason
pub fn wake(thread: &Thread, reason: WakeReason) {
    thread.post_wake(reason);
    thread.host().unpark();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn wake_before_block_is_not_lost() {
        let me = Thread::current();
        wake(&me, WakeReason::Satisfied);
        assert_eq!(block_current(&me), WakeReason::Satisfied);
    }

    #[test]
    fn wake_from_another_thread() {
        let (tx, rx) = mpsc::channel();
        let sleeper = std::thread::spawn(move || {
            let me = Thread::current();
            tx.send(me.clone()).unwrap();
            block_current(&me)
        });
        let target = rx.recv().unwrap();
        wake(&target, WakeReason::TimedOut);
        assert_eq!(sleeper.join().unwrap(), WakeReason::TimedOut);
    }
}
