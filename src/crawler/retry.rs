//! Bounded retry with configurable backoff
//!
//! Every network leg of the pipeline (page fetch, video download, upload) is
//! driven through a [`RetryPolicy`]. Errors decide for themselves whether a
//! retry can help by implementing [`Retryable`].
//!
//! # Delay Calculation
//!
//! | Backoff | Delay after failed attempt `n` |
//! |---------|--------------------------------|
//! | fixed | `base` |
//! | linear | `base * n` |
//! | exponential | `base * 2^(n-1)` |
//!
//! Every delay is capped at `max_delay`.

use crate::config::{Backoff, RetryConfig};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Classification of an error for retry decisions
pub trait Retryable {
    /// Returns true if the same request may succeed when repeated
    fn is_transient(&self) -> bool;
}

/// Retry policy for one leg of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is raised to at least one
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The same policy allowed at most `limit` attempts (never fewer than one)
    pub fn capped_at(self, limit: u32) -> Self {
        Self {
            max_attempts: self.max_attempts.min(limit.max(1)),
            ..self
        }
    }

    /// Delay to wait after attempt `attempt` (1-indexed) failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently or runs out of attempts
    ///
    /// `op` receives the 1-indexed attempt number. The returned value or
    /// failure carries the number of attempts consumed.
    ///
    /// # Arguments
    ///
    /// * `label` - Short description used in log lines (usually a URL or key)
    /// * `op` - The operation to attempt
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<Attempted<T>, RetryFailure<E>>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(label, attempt, "succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) if !error.is_transient() => {
                    tracing::debug!(label, attempt, error = %error, "permanent failure");
                    return Err(RetryFailure::Permanent {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        label,
                        attempts = attempt,
                        error = %error,
                        "giving up after {} attempts",
                        attempt
                    );
                    return Err(RetryFailure::Exhausted {
                        last: error,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// A successful result and the attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why a retried operation ultimately failed
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// The error said retrying would not help
    Permanent { error: E, attempts: u32 },

    /// Every attempt failed with a transient error
    Exhausted { last: E, attempts: u32 },
}

impl<E: Display> RetryFailure<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> &E {
        match self {
            Self::Permanent { error, .. } => error,
            Self::Exhausted { last, .. } => last,
        }
    }

    /// Reason string recorded in the progress file
    pub fn reason(&self) -> String {
        match self {
            Self::Permanent { error, .. } => error.to_string(),
            Self::Exhausted { last, attempts } => {
                format!("{} (after {} attempts)", last, attempts)
            }
        }
    }
}

impl<E: Display> Display for RetryFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason())
    }
}
