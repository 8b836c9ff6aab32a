//! Bounded exponential backoff
//!
//! Attempt `n` (1-based) that fails is followed by a sleep of
//! `initial_backoff * multiplier^(n-1)`, capped at `max_backoff`. No sleep
//! follows the last attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Success(T),
    Exhausted { last_error: E, attempts: u32 },
}

impl RetryPolicy {
    /// A policy that never sleeps
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
        }
    }

    /// Sleep after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds or the attempts are used up
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(e) if attempt >= max_attempts => {
                    return RetryOutcome::Exhausted {
                        last_error: e,
                        attempts: attempt,
                    }
                },
                Err(e) => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2,
            max_backoff: Duration::from_millis(500),
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let outcome = policy
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("busy")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(outcome, RetryOutcome::Success(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reports_last_error() {
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();

        let outcome: RetryOutcome<(), String> = policy
            .run(|attempt| async move { Err(format!("failure {}", attempt)) })
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                last_error: "failure 3".to_string(),
                attempts: 3
            }
        );
        // 2s + 4s between the three attempts, none after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let outcome: RetryOutcome<u32, &str> =
            RetryPolicy::immediate(0).run(|_| async { Ok(1) }).await;
        assert_eq!(outcome, RetryOutcome::Success(1));
    }
}
