use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT_MIN_MS: u64 = 100;
pub const DEFAULT_LOCK_TIMEOUT_MAX_MS: u64 = 1000;
pub const DEFAULT_BUFFER_POOL_PAGES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Lower bound (inclusive) of the per-call lock wait timeout.
    pub lock_timeout_min_ms: u64,
    /// Upper bound (exclusive) of the per-call lock wait timeout.
    pub lock_timeout_max_ms: u64,
    pub lock_table_capacity: usize,
    pub transaction_table_capacity: usize,
    pub buffer_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout_min_ms: DEFAULT_LOCK_TIMEOUT_MIN_MS,
            lock_timeout_max_ms: DEFAULT_LOCK_TIMEOUT_MAX_MS,
            lock_table_capacity: 64,
            transaction_table_capacity: 16,
            buffer_pool_pages: DEFAULT_BUFFER_POOL_PAGES,
        }
    }
}

impl Config {
    pub fn with_lock_timeout(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.lock_timeout_min_ms = min_ms;
        self.lock_timeout_max_ms = max_ms;
        self
    }

    pub fn with_buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    /// Apply `PAGELOCK_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = read_env("PAGELOCK_TIMEOUT_MIN_MS")? {
            self.lock_timeout_min_ms = v;
        }
        if let Some(v) = read_env("PAGELOCK_TIMEOUT_MAX_MS")? {
            self.lock_timeout_max_ms = v;
        }
        if let Some(v) = read_env("PAGELOCK_POOL_PAGES")? {
            self.buffer_pool_pages = v as usize;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_min_ms >= self.lock_timeout_max_ms {
            return Err(Error::InvalidConfig(format!(
                "lock timeout range [{}, {}) is empty",
                self.lock_timeout_min_ms, self.lock_timeout_max_ms
            )));
        }
        if self.buffer_pool_pages == 0 {
            return Err(Error::InvalidConfig(
                "buffer pool needs at least one page".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn lock_timeout_range(&self) -> Range<Duration> {
        Duration::from_millis(self.lock_timeout_min_ms)
            ..Duration::from_millis(self.lock_timeout_max_ms)
    }
}

fn read_env(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{key}={raw} is not a number"))),
        Err(_) => Ok(None),
    }
}
