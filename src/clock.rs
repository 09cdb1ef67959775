// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Clock Sources and Deadlines
//!
//! Blocking primitives accept an absolute deadline on one of two clocks:
//!
//! - **Monotonic**: steady time since the core started; never jumps
//! - **Realtime**: wall-clock time; may be stepped by [`step_realtime`]
//!
//! A [`Deadline`] pairs a clock with an absolute time. It is validated
//! once when built from caller input, and it is the only thing the wait
//! queue needs to arm a timeout: [`Deadline::arm`] is the single place that
//! dispatches on the clock kind.
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::clock::{ClockSelector, Deadline};
//! use rustux_sync::types::{Timespec, CLOCK_MONOTONIC};
//! use std::time::Duration;
//!
//! let at = ClockSelector::Monotonic.now() + Duration::from_millis(50);
//! let deadline = Deadline::new(CLOCK_MONOTONIC, Some(&at)).unwrap();
//! assert!(!deadline.has_expired());
//! ```

use crate::errors::{Error, Result};
use crate::timer::{self, TimerCallback, TimerHandle};
use crate::types::{ClockId, Timespec, CLOCK_MONOTONIC, CLOCK_REALTIME};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// ============================================================================
/// Clock Selector
/// ============================================================================

/// Clock a deadline is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClockSelector {
    /// Steady clock
    Monotonic,

    /// Wall clock
    Realtime,
}

impl ClockSelector {
    /// Resolve a raw clock id
    ///
    /// # Returns
    ///
    /// `InvalidArgs` for any clock other than realtime and monotonic
    pub fn from_id(id: ClockId) -> Result<Self> {
        match id {
            CLOCK_MONOTONIC => Ok(ClockSelector::Monotonic),
            CLOCK_REALTIME => Ok(ClockSelector::Realtime),
            _ => Err(Error::InvalidArgs),
        }
    }

    /// Raw clock id
    pub const fn id(self) -> ClockId {
        match self {
            ClockSelector::Monotonic => CLOCK_MONOTONIC,
            ClockSelector::Realtime => CLOCK_REALTIME,
        }
    }

    /// Read the current time of this clock
    pub fn now(self) -> Timespec {
        match self {
            ClockSelector::Monotonic => monotonic_now(),
            ClockSelector::Realtime => realtime_now(),
        }
    }
}

impl TryFrom<ClockId> for ClockSelector {
    type Error = Error;

    fn try_from(id: ClockId) -> Result<Self> {
        Self::from_id(id)
    }
}

/// ============================================================================
/// Clock Reads
/// ============================================================================

/// Origin of the monotonic clock
static MONOTONIC_BASE: OnceLock<Instant> = OnceLock::new();

/// Offset applied to the host wall clock, in nanoseconds
static REALTIME_OFFSET_NS: AtomicI64 = AtomicI64::new(0);

/// Current monotonic time
pub fn monotonic_now() -> Timespec {
    let base = MONOTONIC_BASE.get_or_init(Instant::now);
    Timespec::from_duration(base.elapsed())
}

/// Current wall-clock time, including any step applied with [`step_realtime`]
pub fn realtime_now() -> Timespec {
    let host = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let offset = REALTIME_OFFSET_NS.load(Ordering::Acquire);
    Timespec::from_nanos(host.as_nanos() as i128 + i128::from(offset))
}

/// Current time of `clock`
pub fn now(clock: ClockSelector) -> Timespec {
    clock.now()
}

/// Step the wall clock by `delta_ns` nanoseconds
///
/// Pending wall-clock timeouts are re-evaluated against the new time.
/// Stepping forward can expire them early; stepping backward delays them.
/// Monotonic timeouts are unaffected.
pub fn step_realtime(delta_ns: i64) {
    let previous = REALTIME_OFFSET_NS.fetch_add(delta_ns, Ordering::AcqRel);
    log_debug!(
        "realtime clock stepped by {} ns (offset {} -> {})",
        delta_ns,
        previous,
        previous.saturating_add(delta_ns)
    );
    timer::kick();
}

/// ============================================================================
/// Deadline
/// ============================================================================

/// Absolute deadline on a selected clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deadline {
    clock: ClockSelector,
    at: Timespec,
}

impl Deadline {
    /// Validate caller input and build a deadline
    ///
    /// # Arguments
    ///
    /// * `clock_id` - Raw clock id; only realtime and monotonic are accepted
    /// * `abstime` - Absolute expiry time on that clock
    ///
    /// # Returns
    ///
    /// `InvalidArgs` if the deadline is missing, malformed, or the clock is
    /// unsupported
    pub fn new(clock_id: ClockId, abstime: Option<&Timespec>) -> Result<Self> {
        let clock = ClockSelector::from_id(clock_id)?;
        let at = abstime.ok_or(Error::InvalidArgs)?;
        Self::on(clock, *at)
    }

    /// Build a deadline on an already resolved clock
    pub fn on(clock: ClockSelector, at: Timespec) -> Result<Self> {
        if !at.is_valid() {
            return Err(Error::InvalidArgs);
        }
        Ok(Self { clock, at })
    }

    /// Deadline `timeout` from now
    pub fn after(clock: ClockSelector, timeout: Duration) -> Self {
        Self {
            clock,
            at: clock.now() + timeout,
        }
    }

    pub fn clock(&self) -> ClockSelector {
        self.clock
    }

    pub fn at(&self) -> Timespec {
        self.at
    }

    /// Check whether the deadline is at or before the current time
    pub fn has_expired(&self) -> bool {
        self.clock.now() >= self.at
    }

    /// Time left until expiry (zero once expired)
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(self.clock.now())
    }

    /// Arm a one-shot timeout that runs `callback` once the deadline passes
    pub(crate) fn arm(&self, callback: TimerCallback) -> TimerHandle {
        match self.clock {
            ClockSelector::Monotonic => timer::arm_monotonic(self.at, callback),
            ClockSelector::Realtime => timer::arm_realtime(self.at, callback),
        }
    }
}
