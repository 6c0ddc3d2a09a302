//! Retransmission policy.
//!
//! A logical request is retried only for failures that
//! [`TransportError::is_retryable`] accepts. The caller keeps the request
//! identity stable across attempts; this module only decides whether and
//! when to try again.

use crate::error::TransportError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff and budget for retransmitting one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Initial backoff
    pub base_backoff: Duration,
    /// Upper bound for a single backoff
    pub max_backoff: Duration,
    /// Overall time budget across attempts
    pub retry_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
            retry_timeout: Duration::from_secs(300),
        }
    }
}

/// Attempt bookkeeping handed to each attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Zero for the first transmission
    pub attempt: u32,
    /// Why the previous attempt was retried
    pub reason: Option<String>,
}

impl RetryState {
    /// Whether this transmission repeats an earlier one.
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial backoff.
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Decorrelated jitter: the next sleep is drawn from
    /// `[base, 3 * previous]`, capped at `max_backoff`.
    pub fn next_backoff(&self, previous: Duration) -> Duration {
        let lower = self.base_backoff;
        let upper = (previous * 3).max(lower).min(self.max_backoff);
        if upper <= lower {
            return upper;
        }
        let millis = rand::rng().random_range(lower.as_millis()..=upper.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error,
    /// or the budget is spent.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, TransportError>
    where
        F: FnMut(RetryState) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let started = Instant::now();
        let mut state = RetryState {
            attempt: 0,
            reason: None,
        };
        let mut backoff = self.base_backoff;

        loop {
            match attempt(state.clone()).await {
                Ok(value) => {
                    if state.is_retry() {
                        debug!(attempt = state.attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    let attempts = state.attempt + 1;
                    if attempts >= self.max_attempts || started.elapsed() >= self.retry_timeout {
                        return Err(TransportError::RetriesExhausted {
                            attempts,
                            last_error: err.to_string(),
                        });
                    }

                    backoff = self.next_backoff(backoff);
                    warn!(
                        attempt = attempts,
                        reason = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(backoff).await;

                    state = RetryState {
                        attempt: attempts,
                        reason: Some(err.retry_reason()),
                    };
                }
            }
        }
    }
}
