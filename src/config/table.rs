//! # Table Configuration
//!
//! `TableConfig` holds the operational parameters a table handle consumes.
//! They do not change the on-disk format, so different processes may open the
//! same table with different configurations.
//!
//! ## Configuration Options
//!
//! | Option           | Default | Environment override        |
//! |------------------|---------|-----------------------------|
//! | lock_timeout     | 5s      | `MMTABLE_LOCK_TIMEOUT_MS`   |
//! | growth_bytes     | 4 MiB   | `MMTABLE_GROWTH_BYTES`      |
//! | initial_capacity | 1024    | `MMTABLE_INITIAL_CAPACITY`  |
//! | clock_skew       | 0       | `MMTABLE_CLOCK_SKEW_MS`     |
//!
//! ## Usage
//!
//! ```ignore
//! let config = TableConfig::from_env()?
//!     .lock_timeout(Duration::from_millis(250))
//!     .initial_capacity(4096);
//! ```

use std::time::Duration;

use eyre::{ensure, Result, WrapErr};

use super::constants::{
    DEFAULT_CLOCK_SKEW, DEFAULT_GROWTH_BYTES, DEFAULT_INITIAL_CAPACITY, DEFAULT_LOCK_TIMEOUT,
    MAX_RECORD_ID,
};

pub const ENV_LOCK_TIMEOUT_MS: &str = "MMTABLE_LOCK_TIMEOUT_MS";
pub const ENV_GROWTH_BYTES: &str = "MMTABLE_GROWTH_BYTES";
pub const ENV_INITIAL_CAPACITY: &str = "MMTABLE_INITIAL_CAPACITY";
pub const ENV_CLOCK_SKEW_MS: &str = "MMTABLE_CLOCK_SKEW_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    lock_timeout: Duration,
    growth_bytes: usize,
    initial_capacity: u64,
    clock_skew: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TableConfig {
    pub fn new() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            growth_bytes: DEFAULT_GROWTH_BYTES,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    /// Builds a configuration from the `MMTABLE_*` environment variables,
    /// falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TableConfig::from_env`] but reads variables through `lookup`.
    ///
    /// Set but unparsable values are errors rather than silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(ms) = parse_var(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_var(&lookup, ENV_GROWTH_BYTES)? {
            ensure!(bytes > 0, "{} must be greater than zero", ENV_GROWTH_BYTES);
            config.growth_bytes = bytes as usize;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_INITIAL_CAPACITY)? {
            ensure!(
                capacity <= MAX_RECORD_ID + 1,
                "{} of {} exceeds the maximum of {} records",
                ENV_INITIAL_CAPACITY,
                capacity,
                MAX_RECORD_ID + 1
            );
            config.initial_capacity = capacity;
        }
        if let Some(ms) = parse_var(&lookup, ENV_CLOCK_SKEW_MS)? {
            config.clock_skew = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the growth step for persistent tables. The effective step is
    /// never smaller than one record.
    pub fn growth_bytes(mut self, bytes: usize) -> Self {
        self.growth_bytes = bytes.max(1);
        self
    }

    pub fn initial_capacity(mut self, capacity: u64) -> Self {
        self.initial_capacity = capacity.min(MAX_RECORD_ID + 1);
        self
    }

    pub fn clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub fn get_lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn get_growth_bytes(&self) -> usize {
        self.growth_bytes
    }

    pub fn get_initial_capacity(&self) -> u64 {
        self.initial_capacity
    }

    pub fn get_clock_skew(&self) -> Duration {
        self.clock_skew
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<u64>()
                .wrap_err_with(|| format!("invalid value '{}' for {}", raw, key))?;
            Ok(Some(value))
        }
    }
}
