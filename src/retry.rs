//! Bounded retry with exponential backoff around catalog calls.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests, local catalogs).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Run `op`, retrying transient failures. Non-transient errors are
    /// returned immediately; the last transient error is returned once
    /// attempts are exhausted.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Result<T, CatalogError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {:?}",
                        label, attempt, attempts, err, delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    debug!("{}: giving up after {} attempt(s): {}", label, attempt, err);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_retries_transient_until_success() {
        let mut calls = 0;
        let result = RetryPolicy::immediate(3).run("search", || {
            calls += 1;
            if calls < 3 {
                Err(CatalogError::Transient("busy".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::immediate(2).run("search", || {
            calls += 1;
            Err(CatalogError::Transient("busy".into()))
        });
        assert_eq!(calls, 2);
        assert_eq!(result, Err(CatalogError::Transient("busy".into())));
    }

    #[test]
    fn test_non_transient_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::immediate(5).run("search", || {
            calls += 1;
            Err(CatalogError::Connect("bad credentials".into()))
        });
        assert_eq!(calls, 1);
        assert!(result.is_err());
    }
}
