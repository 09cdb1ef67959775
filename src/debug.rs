// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Logging and Diagnostics
//!
//! Crate-internal logging macros. With the `logging` feature they forward
//! to the `log` facade, so the embedding application picks the backend.
//! Without it they compile to nothing but still type-check their
//! arguments.
//!
//! # Usage
//!
//! ```rust,ignore
//! log_debug!("mutex {:p}: handoff to tid {}", self, tid);
//!
//! // Conditional tracing, gated by a runtime trace category
//! log_trace_if!(trace_enabled(TraceFlags::QUEUE), "enqueue tid {}", tid);
//! ```

/// Log a trace message
#[cfg(feature = "logging")]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        ::log::trace!(target: "rustux_sync", $($arg)*)
    };
}

/// Log a trace message
#[cfg(not(feature = "logging"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

/// Log a trace message if condition is true
macro_rules! log_trace_if {
    ($cond:expr, $($arg:tt)*) => {
        if $cond {
            log_trace!($($arg)*);
        }
    };
}

/// Log a debug message
#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        ::log::debug!(target: "rustux_sync", $($arg)*)
    };
}

/// Log a debug message
#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

/// Log an info message
#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => {
        ::log::info!(target: "rustux_sync", $($arg)*)
    };
}

/// Log an info message
#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

/// Log a warning message
#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        ::log::warn!(target: "rustux_sync", $($arg)*)
    };
}

/// Log a warning message
#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

/// Check whether a trace category is enabled in the active configuration
#[inline]
pub(crate) fn trace_enabled(flag: crate::config::TraceFlags) -> bool {
    crate::config::get().trace.contains(flag)
}
