//! # Manager configuration.
//!
//! [`Config`] defines the dispatcher's behavior: the concurrency bound,
//! the message-id file location, the metering cadence for external
//! processes, and the submission channel capacity.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use procvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.max_jobs = 4;
//! cfg.meter_interval = Duration::from_secs(5);
//!
//! assert_eq!(cfg.max_jobs, 4);
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the process manager.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of commands running concurrently.
    pub max_jobs: usize,
    /// File backing the monotonic message-id counter.
    pub mid_file: PathBuf,
    /// Cadence of the per-process metering ticker (0 = disabled).
    pub meter_interval: Duration,
    /// Capacity of the direct submission channel.
    pub cmd_capacity: usize,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `max_jobs = 10`
    /// - `mid_file = ".procvisor.mid"`
    /// - `meter_interval = 2s`
    /// - `cmd_capacity = 64`
    fn default() -> Self {
        Self {
            max_jobs: 10,
            mid_file: PathBuf::from(".procvisor.mid"),
            meter_interval: Duration::from_secs(2),
            cmd_capacity: 64,
        }
    }
}

impl Config {
    /// Concurrency bound, never below one slot.
    pub(crate) fn jobs_clamped(&self) -> usize {
        self.max_jobs.max(1)
    }

    /// Submission channel capacity, never below one.
    pub(crate) fn capacity_clamped(&self) -> usize {
        self.cmd_capacity.max(1)
    }
}
