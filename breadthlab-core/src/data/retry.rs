//! Bounded retry with a fixed pause, stretched to any server-requested
//! delay, shared by the exchange fetcher and the
//! webhook notifier.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Minimum wait the server asked for before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    /// Five attempts, two seconds apart.
    pub const fn fetch_default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }

    /// Three attempts, two seconds apart.
    pub const fn notify_default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. `op` receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let pause = self.backoff().max(e.retry_after().unwrap_or_default());
                    warn!(
                        label,
                        attempt,
                        max_attempts = attempts,
                        pause_ms = pause.as_millis() as u64,
                        error = %e,
                        "attempt failed; retrying"
                    );
                    std::thread::sleep(pause);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fetch_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::time::Instant;

    #[derive(Debug)]
    struct Flaky(bool);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let out = quick(5).run("test", |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(Flaky(true))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let out: Result<(), Flaky> = quick(4).run("test", |_| {
            calls += 1;
            Err(Flaky(true))
        });
        assert!(out.is_err());
        assert_eq!(calls, 4);
    }

    #[test]
    fn stops_on_permanent_error() {
        let mut calls = 0;
        let out: Result<(), Flaky> = quick(5).run("test", |_| {
            calls += 1;
            Err(Flaky(false))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), Flaky> = quick(0).run("test", |_| {
            calls += 1;
            Err(Flaky(true))
        });
        assert_eq!(calls, 1);
    }

    #[derive(Debug)]
    struct Throttled(Duration);

    impl fmt::Display for Throttled {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "throttled for {:?}", self.0)
        }
    }

    impl Retryable for Throttled {
        fn is_retryable(&self) -> bool {
            true
        }

        fn retry_after(&self) -> Option<Duration> {
            Some(self.0)
        }
    }

    #[test]
    fn waits_at_least_the_requested_delay() {
        let started = Instant::now();
        let out = quick(2).run("test", |attempt| {
            if attempt == 1 {
                Err(Throttled(Duration::from_millis(30)))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 2);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn no_pause_after_the_last_attempt() {
        let started = Instant::now();
        let out: Result<(), Throttled> =
            quick(1).run("test", |_| Err(Throttled(Duration::from_secs(60))));
        assert!(out.is_err());
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn defaults() {
        assert_eq!(RetryPolicy::fetch_default().max_attempts, 5);
        assert_eq!(RetryPolicy::notify_default().max_attempts, 3);
        assert_eq!(RetryPolicy::default().backoff(), Duration::from_secs(2));
    }
}
