// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Configuration
//!
//! Tunables for the synchronization core, written as command-line style
//! `key=value` options separated by whitespace.
//!
//! # Design
//!
//! - Configuration is installed once; later reads are lock-free
//! - Without an explicit [`init`], options are read from the
//!   `RUSTUX_SYNC_OPTIONS` environment variable on first use
//! - A key without a value is treated as `key=true`
//!
//! # Usage
//!
//! ```rust
//! use rustux_sync::config::{self, Config, TraceFlags};
//!
//! let cfg = Config::parse("sync.inherit.max_depth=8 sync.trace=queue,inherit").unwrap();
//! assert_eq!(cfg.inherit_max_depth, 8);
//! assert!(cfg.trace.contains(TraceFlags::QUEUE));
//! let _ = config::init(cfg);
//! ```

use crate::errors::{Error, Result};
use crate::types::{Priority, PRIORITY_DEFAULT};
use bitflags::bitflags;

/// ============================================================================
/// Option Keys
/// ============================================================================

/// Environment variable consulted when no configuration was installed
pub const OPTIONS_ENV: &str = "RUSTUX_SYNC_OPTIONS";

/// Maximum number of owner hops followed by one inheritance update
pub const KEY_INHERIT_MAX_DEPTH: &str = "sync.inherit.max_depth";

/// Base priority of threads first seen by the core
pub const KEY_DEFAULT_PRIORITY: &str = "sync.thread.default_priority";

/// Comma separated trace categories (`queue`, `inherit`, `timer`, `all`, `none`)
pub const KEY_TRACE: &str = "sync.trace";

/// Name of the timer service thread
pub const KEY_TIMER_NAME: &str = "sync.timer.name";

/// Upper bound accepted for `sync.inherit.max_depth`
const INHERIT_MAX_DEPTH_LIMIT: usize = 1024;

bitflags! {
    /// Trace categories for verbose logging
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TraceFlags: u32 {
        /// Enqueue, dequeue and cancel events
        const QUEUE = 1 << 0;
        /// Priority boosts and reverts
        const INHERIT = 1 << 1;
        /// Timer arm, cancel and fire
        const TIMER = 1 << 2;
    }
}

/// ============================================================================
/// Configuration
/// ============================================================================

/// Synchronization core tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bound on transitive inheritance propagation
    pub inherit_max_depth: usize,

    /// Base priority given to threads on first use
    pub default_priority: Priority,

    /// Enabled trace categories
    pub trace: TraceFlags,

    /// Name of the timer service thread
    pub timer_thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inherit_max_depth: 16,
            default_priority: PRIORITY_DEFAULT,
            trace: TraceFlags::empty(),
            timer_thread_name: String::from("rx-sync-timer"),
        }
    }
}

impl Config {
    /// Parse a whitespace separated option string on top of the defaults
    ///
    /// # Returns
    ///
    /// `InvalidArgs` for unknown keys or malformed values
    pub fn parse(cmdline: &str) -> Result<Self> {
        let mut config = Self::default();
        for option in cmdline.split_whitespace() {
            config.apply(option)?;
        }
        Ok(config)
    }

    /// Apply a single `key=value` option
    pub fn apply(&mut self, option: &str) -> Result<()> {
        let (key, value) = option.split_once('=').unwrap_or((option, "true"));

        match key {
            KEY_INHERIT_MAX_DEPTH => {
                let depth: usize = value.parse().map_err(|_| Error::InvalidArgs)?;
                if depth > INHERIT_MAX_DEPTH_LIMIT {
                    return Err(Error::InvalidArgs);
                }
                self.inherit_max_depth = depth;
            }
            KEY_DEFAULT_PRIORITY => {
                self.default_priority = value.parse().map_err(|_| Error::InvalidArgs)?;
            }
            KEY_TRACE => {
                self.trace = parse_trace(value)?;
            }
            KEY_TIMER_NAME => {
                if value.is_empty() {
                    return Err(Error::InvalidArgs);
                }
                self.timer_thread_name = value.to_string();
            }
            _ => return Err(Error::InvalidArgs),
        }
        Ok(())
    }
}

fn parse_trace(value: &str) -> Result<TraceFlags> {
    let mut flags = TraceFlags::empty();
    for name in value.split(',').filter(|s| !s.is_empty()) {
        flags |= match name {
            "queue" => TraceFlags::QUEUE,
            "inherit" => TraceFlags::INHERIT,
            "timer" => TraceFlags::TIMER,
            "all" | "true" => TraceFlags::all(),
            "none" => TraceFlags::empty(),
            _ => return Err(Error::InvalidArgs),
        };
    }
    Ok(flags)
}

/// ============================================================================
/// Global Configuration
/// ============================================================================

static CONFIG: spin::Once<Config> = spin::Once::new();

/// Install the configuration
///
/// Must run before the first primitive is used to take effect.
///
/// # Returns
///
/// `Busy` if a configuration is already active
pub fn init(config: Config) -> Result<()> {
    let mut installed = false;
    CONFIG.call_once(|| {
        installed = true;
        config
    });
    if installed {
        log_info!("sync config installed: {:?}", CONFIG.get());
        Ok(())
    } else {
        Err(Error::Busy)
    }
}

/// Get the active configuration, loading it from the environment on first use
pub fn get() -> &'static Config {
    CONFIG.call_once(from_env)
}

fn from_env() -> Config {
    let Ok(options) = std::env::var(OPTIONS_ENV) else {
        return Config::default();
    };
    match Config::parse(&options) {
        Ok(config) => config,
        Err(err) => {
            log_warn!("ignoring {}={:?}: {}", OPTIONS_ENV, options, err);
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.default_priority, PRIORITY_DEFAULT);
    }

    #[test]
    fn parses_all_keys() {
        let cfg = Config::parse(
            "sync.inherit.max_depth=4 sync.thread.default_priority=40 \
             sync.trace=queue,timer sync.timer.name=tmr",
        )
        .unwrap();
        assert_eq!(cfg.inherit_max_depth, 4);
        assert_eq!(cfg.default_priority, 40);
        assert_eq!(cfg.trace, TraceFlags::QUEUE | TraceFlags::TIMER);
        assert_eq!(cfg.timer_thread_name, "tmr");
    }

    #[test]
    fn bare_key_means_true() {
        let cfg = Config::parse("sync.trace").unwrap();
        assert_eq!(cfg.trace, TraceFlags::all());
    }

    #[test]
    fn rejects_bad_options() {
        assert_eq!(Config::parse("sync.bogus=1"), Err(Error::InvalidArgs));
        assert_eq!(Config::parse("sync.inherit.max_depth=x"), Err(Error::InvalidArgs));
        assert_eq!(Config::parse("sync.inherit.max_depth=99999"), Err(Error::InvalidArgs));
        assert_eq!(Config::parse("sync.thread.default_priority=256"), Err(Error::InvalidArgs));
        assert_eq!(Config::parse("sync.trace=disk"), Err(Error::InvalidArgs));
    }
}
