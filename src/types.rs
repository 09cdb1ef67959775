// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Common types shared by the synchronization core

use core::ops::Add;
use std::time::Duration;

/// ============================================================================
/// Thread and Priority Types
/// ============================================================================

/// Thread ID type
pub type Tid = u64;

/// Invalid thread ID
pub const TID_INVALID: Tid = 0;

/// Thread priority (higher value = more urgent)
pub type Priority = u8;

/// Idle priority (lowest)
pub const PRIORITY_IDLE: Priority = 0;

/// Default priority
pub const PRIORITY_DEFAULT: Priority = 128;

/// Real-time priority (highest)
pub const PRIORITY_REALTIME: Priority = 255;

/// ============================================================================
/// Clock Identifiers
/// ============================================================================

/// Raw clock identifier as passed by callers
pub type ClockId = i32;

/// Wall clock; may be stepped
pub const CLOCK_REALTIME: ClockId = 0;

/// Steady clock; never jumps
pub const CLOCK_MONOTONIC: ClockId = 1;

/// Process CPU-time clock (not usable for waits)
pub const CLOCK_PROCESS_CPUTIME_ID: ClockId = 2;

/// Thread CPU-time clock (not usable for waits)
pub const CLOCK_THREAD_CPUTIME_ID: ClockId = 3;

/// ============================================================================
/// Time Values
/// ============================================================================

/// Nanoseconds per second
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Absolute time value on some clock
///
/// Ordering compares seconds, then nanoseconds, which is correct for
/// normalized values (see [`Timespec::is_valid`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    /// The clock origin
    pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

    /// Largest representable time
    pub const MAX: Timespec = Timespec {
        sec: i64::MAX,
        nsec: NSEC_PER_SEC - 1,
    };

    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Check that the value is a normalized, non-negative time
    pub const fn is_valid(&self) -> bool {
        self.sec >= 0 && self.nsec >= 0 && self.nsec < NSEC_PER_SEC
    }

    /// Build from a duration since the clock origin, saturating at `MAX`
    pub fn from_duration(d: Duration) -> Self {
        match i64::try_from(d.as_secs()) {
            Ok(sec) => Self {
                sec,
                nsec: i64::from(d.subsec_nanos()),
            },
            Err(_) => Self::MAX,
        }
    }

    /// Duration since the clock origin (zero for invalid values)
    pub fn to_duration(&self) -> Duration {
        if !self.is_valid() {
            return Duration::ZERO;
        }
        Duration::new(self.sec as u64, self.nsec as u32)
    }

    /// Total nanoseconds
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.sec) * i128::from(NSEC_PER_SEC) + i128::from(self.nsec)
    }

    /// Build from total nanoseconds, clamping to `ZERO..=MAX`
    pub fn from_nanos(nanos: i128) -> Self {
        if nanos <= 0 {
            return Self::ZERO;
        }
        let per_sec = i128::from(NSEC_PER_SEC);
        match i64::try_from(nanos / per_sec) {
            Ok(sec) => Self {
                sec,
                nsec: (nanos % per_sec) as i64,
            },
            Err(_) => Self::MAX,
        }
    }

    /// Time from `earlier` to `self`, or zero if `earlier` is not before `self`
    pub fn saturating_duration_since(&self, earlier: Timespec) -> Duration {
        let delta = self.as_nanos() - earlier.as_nanos();
        if delta <= 0 {
            return Duration::ZERO;
        }
        Timespec::from_nanos(delta).to_duration()
    }

    /// Add a duration, saturating at `MAX`
    pub fn saturating_add(self, d: Duration) -> Self {
        let nanos = self.as_nanos().saturating_add(d.as_nanos() as i128);
        Self::from_nanos(nanos)
    }
}

impl Add<Duration> for Timespec {
    type Output = Timespec;

    fn add(self, rhs: Duration) -> Timespec {
        self.saturating_add(rhs)
    }
}
