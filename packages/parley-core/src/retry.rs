//! Bounded fixed-interval retry for backend connections.
//!
//! The datastore is usually a separate service that may still be starting
//! when Parley boots. Connection attempts are repeated every `interval`
//! until `timeout` has elapsed since the first attempt, after which the last
//! error is returned.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Default pause between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default total time budget for connecting.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Fixed-interval retry window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `attempt` until it succeeds or the window closes.
    ///
    /// Returns the successful value, or the final error together with the
    /// number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, (E, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if started.elapsed() >= self.timeout {
                        tracing::error!(
                            target_name = what,
                            attempts,
                            error = %e,
                            "Giving up on connection after retry window"
                        );
                        return Err((e, attempts));
                    }
                    tracing::warn!(
                        target_name = what,
                        attempts,
                        retry_in_secs = self.interval.as_secs_f64(),
                        error = %e,
                        "Backend unavailable, retrying"
                    );
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_TIMEOUT)
    }
}
