//! Bounded retry with a fixed back-off for flaky remote calls.

use std::thread;
use std::time::Duration;

use tracing::{error, warn};

use crate::io::config::RetryConfig;
use crate::io::services::TransientError;

/// Fixed retry budget applied to every remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Sleep between a failure and the next attempt.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts,
            interval: Duration::from_millis(cfg.interval_ms),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the budget is exhausted.
    ///
    /// Returns the last error once every attempt has failed. `what` names the
    /// call in log output.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, TransientError>
    where
        F: FnMut() -> Result<T, TransientError>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    warn!(call = what, attempt, attempts, err = %err, "remote call failed, retrying");
                    thread::sleep(self.interval);
                    attempt += 1;
                }
                Err(err) => {
                    error!(call = what, attempts, err = %err, "remote call failed, giving up");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let value = instant(5)
            .run("flaky", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(TransientError::Other("nope".to_string()))
                } else {
                    Ok(42)
                }
            })
            .expect("eventually succeeds");
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let calls = Cell::new(0);
        let err = instant(5)
            .run("down", || -> Result<(), TransientError> {
                calls.set(calls.get() + 1);
                Err(TransientError::Other(format!("attempt {}", calls.get())))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 5);
        assert_eq!(err.to_string(), "attempt 5");
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let calls = Cell::new(0);
        let _ = instant(0).run("once", || -> Result<(), TransientError> {
            calls.set(calls.get() + 1);
            Err(TransientError::Other("x".to_string()))
        });
        assert_eq!(calls.get(), 1);
    }
}
