//! Bounded retry with exponential backoff

use crate::backend::BackendError;
use crate::monitor::Sleeper;
use log::warn;
use std::time::Duration;

/// Retry budget for transient backend failures
///
/// An operation runs once plus up to `max_retries` more times. The wait
/// before retry `n` (counting from zero) is `base_delay × 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }

    /// Run `op` until it succeeds, fails permanently or the budget runs out
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, what: &str, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Result<T, BackendError>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
