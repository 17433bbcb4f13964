// Bounded retry with exponential backoff
// Every wait and every attempt races the cancellation token


use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// An error that knows whether another attempt could succeed
pub trait Transient: Sized {
    fn is_transient(&self) -> bool;

    /// The error reported when a single attempt exceeds its deadline
    fn timed_out(after: Duration) -> Self;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Fatal(E),
}

impl<E> RetryError<E> {
    /// The underlying error, if the operation itself failed
    #[inline]
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal(error) => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one
    #[inline]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            attempt_timeout: None,
        }
    }

    /// A single attempt, no backoff
    #[inline]
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    #[inline]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before attempt `attempt + 1`
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of attempts, or is cancelled
    #[inline]
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = self.attempt(operation()) => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Succeeded on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                debug!("Permanent failure on attempt {}: {}", attempt, error);
                return Err(RetryError::Fatal(error));
            }

            if attempt >= self.max_attempts {
                warn!("All {} attempts failed: {}", attempt, error);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, self.max_attempts, error, delay
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RetryError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    async fn attempt<T, E, Fut>(&self, future: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Transient,
    {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .unwrap_or_else(|_| Err(E::timed_out(limit))),
            None => future.await,
        }
    }
}
