// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Common error types used throughout the synchronization core

use thiserror::Error;

/// Result type for operations that can fail
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Status code as exchanged with C-style callers (0 or a positive errno)
pub type Status = i32;

/// POSIX status values produced by [`Error::to_status`]
pub mod status {
    use super::Status;

    pub const OK: Status = 0;
    pub const EPERM: Status = 1;
    pub const EBUSY: Status = 16;
    pub const EINVAL: Status = 22;
    pub const EDEADLK: Status = 35;
    pub const EOVERFLOW: Status = 75;
    pub const ETIMEDOUT: Status = 110;
}

/// Synchronization errors
///
/// Every variant except `TimedOut` is reported before the caller could
/// have been suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Missing deadline, malformed time value, or unsupported clock
    #[error("invalid argument")]
    InvalidArgs,

    /// Object is destroyed or its validity tag is corrupt
    #[error("invalid or destroyed object")]
    InvalidObject,

    /// Caller does not hold the object it tried to release
    #[error("caller is not the owner")]
    NotOwner,

    /// Deadline passed before the wait was satisfied
    #[error("timed out")]
    TimedOut,

    /// Immediate-try failed, or destroy found the object in use
    #[error("resource busy")]
    Busy,

    /// Caller would wait on an object it already holds
    #[error("resource deadlock would occur")]
    Deadlock,

    /// Condition variable is bound to a different mutex
    #[error("condition variable bound to another mutex")]
    MutexMismatch,

    /// Counter would exceed its maximum
    #[error("value overflow")]
    Overflow,
}

impl Error {
    /// Convert error to status code
    pub fn to_status(self) -> Status {
        match self {
            Error::InvalidArgs | Error::InvalidObject | Error::MutexMismatch => status::EINVAL,
            Error::NotOwner => status::EPERM,
            Error::TimedOut => status::ETIMEDOUT,
            Error::Busy => status::EBUSY,
            Error::Deadlock => status::EDEADLK,
            Error::Overflow => status::EOVERFLOW,
        }
    }

    /// Convert status code to error
    ///
    /// `EINVAL` is ambiguous and maps back to `InvalidArgs`. Returns
    /// `None` for `OK` and for codes this crate never produces.
    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            status::EINVAL => Some(Error::InvalidArgs),
            status::EPERM => Some(Error::NotOwner),
            status::ETIMEDOUT => Some(Error::TimedOut),
            status::EBUSY => Some(Error::Busy),
            status::EDEADLK => Some(Error::Deadlock),
            status::EOVERFLOW => Some(Error::Overflow),
            _ => None,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

/// Collapse a result into a status code
pub fn result_to_status(result: Result) -> Status {
    match result {
        Ok(()) => status::OK,
        Err(err) => err.to_status(),
    }
}
