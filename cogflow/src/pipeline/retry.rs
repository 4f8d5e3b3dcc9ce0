//! Retry decisions with exponential backoff and jitter.
//!
//! Only the primary node of a stage is retried. The delay before retry
//! `attempt` (0-based) is `backoff_base * 2^attempt`, capped at
//! `max_backoff`, then scaled by the configured jitter so concurrent
//! requests hitting the same failing node do not retry in lockstep.

use crate::cancellation::CancellationToken;
use crate::errors::ErrorKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    Full,
    /// Delay scaled by a factor drawn from [0.5, 1.0)
    #[default]
    Equal,
}

/// Backoff settings shared by every stage of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delay cap in milliseconds.
    pub max_backoff_ms: u64,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff_ms: 10_000,
            jitter: JitterStrategy::Equal,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_backoff_ms(mut self, delay: u64) -> Self {
        self.max_backoff_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Computes the capped exponential delay before applying jitter.
    #[must_use]
    pub fn base_delay(&self, backoff_base: Duration, attempt: u32) -> Duration {
        let base = u64::try_from(backoff_base.as_millis()).unwrap_or(u64::MAX);
        let exp_delay = base.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(exp_delay.min(self.max_backoff_ms))
    }

    /// Computes the jittered delay before retry `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, backoff_base: Duration, attempt: u32) -> Duration {
        let delay = self.base_delay(backoff_base, attempt);
        if delay.is_zero() {
            return delay;
        }

        match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => delay.mul_f64(rand::thread_rng().gen_range(0.0..=1.0)),
            JitterStrategy::Equal => delay.mul_f64(rand::thread_rng().gen_range(0.5..1.0)),
        }
    }

    /// Decides what to do after a failed attempt on the primary node.
    ///
    /// `attempt` is the 0-based index of the attempt that just failed.
    #[must_use]
    pub fn decide(
        &self,
        kind: ErrorKind,
        attempt: u32,
        max_retries: u32,
        backoff_base: Duration,
    ) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::NotRetryable;
        }
        if attempt >= max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay(backoff_base, attempt))
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Whether a cancellable sleep ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full delay elapsed.
    Elapsed,
    /// The token was cancelled first.
    Cancelled,
}

/// Sleeps for `delay` unless the token is cancelled first.
pub async fn cancellable_sleep(delay: Duration, token: &CancellationToken) -> SleepOutcome {
    tokio::select! {
        biased;
        () = token.cancelled() => SleepOutcome::Cancelled,
        () = tokio::time::sleep(delay) => SleepOutcome::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_jitter_strategy_default() {
        assert_eq!(JitterStrategy::default(), JitterStrategy::Equal);
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_backoff_ms, 10_000);
        assert_eq!(policy.jitter, JitterStrategy::Equal);
    }

    #[test]
    fn test_exponential_delay_no_jitter() {
        let policy = RetryPolicy::new().with_jitter(JitterStrategy::None);
        let base = Duration::from_millis(100);

        assert_eq!(policy.delay(base, 0), Duration::from_millis(100));
        assert_eq!(policy.delay(base, 1), Duration::from_millis(200));
        assert_eq!(policy.delay(base, 2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_max_backoff_ms(5000)
            .with_jitter(JitterStrategy::None);

        // Would be 1024 * 1000 without cap
        let delay = policy.delay(Duration::from_millis(1000), 10);
        assert_eq!(delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_equal_jitter_range() {
        let policy = RetryPolicy::new().with_jitter(JitterStrategy::Equal);
        let base = Duration::from_millis(1000);

        for _ in 0..50 {
            let delay = policy.delay(base, 0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_full_jitter_range() {
        let policy = RetryPolicy::new().with_jitter(JitterStrategy::Full);
        for _ in 0..20 {
            assert!(policy.delay(Duration::from_millis(100), 0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_zero_base_means_no_delay() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.delay(Duration::ZERO, 3), Duration::ZERO);
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::new().with_jitter(JitterStrategy::None);
        let base = Duration::from_millis(10);

        assert_eq!(
            policy.decide(ErrorKind::TransientError, 0, 2, base),
            RetryDecision::Retry(Duration::from_millis(10))
        );
        assert_eq!(
            policy.decide(ErrorKind::StageTimeout, 1, 2, base),
            RetryDecision::Retry(Duration::from_millis(20))
        );
        assert_eq!(
            policy.decide(ErrorKind::TransientError, 2, 2, base),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(ErrorKind::TerminalError, 0, 5, base),
            RetryDecision::NotRetryable
        );
    }

    #[tokio::test]
    async fn test_cancellable_sleep_elapses() {
        let token = CancellationToken::new();
        let outcome = cancellable_sleep(Duration::from_millis(5), &token).await;
        assert_eq!(outcome, SleepOutcome::Elapsed);
    }

    #[tokio::test]
    async fn test_cancellable_sleep_unblocks_on_cancel() {
        let token = CancellationToken::shared();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel("stop");
            })
        };

        let start = Instant::now();
        let outcome = cancellable_sleep(Duration::from_secs(30), &token).await;
        canceller.await.unwrap();

        assert_eq!(outcome, SleepOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
