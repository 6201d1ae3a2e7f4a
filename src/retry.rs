//! Retry policy shared by every retryable operation.
//!
//! Attempt budgets and delay sequences are part of the call site's
//! signature: a [`RetryPolicy`] value is handed into each retryable call
//! rather than hidden behind a wrapper.

use std::future::Future;
use std::time::Duration;

/// A bounded retry schedule: up to `max_retries` retries after the first
/// attempt, sleeping `delays[attempt]` before each retry. When attempts
/// outnumber delays, the last delay repeats.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Schedule used for re-running in-page extraction of missing pages:
    /// 2s, 5s, then 10s for every further attempt.
    pub fn extraction(max_retries: u32) -> Self {
        Self {
            max_retries,
            delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }

    /// Fixed-delay schedule, used for per-page HTTP fetch retries.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delays: vec![delay],
        }
    }

    /// Delay to sleep before retry number `attempt` (0-based), clamped to
    /// the last configured delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt as usize).min(self.delays.len() - 1);
        self.delays[idx]
    }

    /// Drive a fallible async operation through the attempt budget.
    /// Returns the first success, or the last error once retries are
    /// exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_clamps_to_last() {
        let policy = RetryPolicy::extraction(5);
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for(100), Duration::from_secs(10));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));

        let result: Result<u32, &str> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));

        let result: Result<(), &str> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always") }
            })
            .await;

        assert_eq!(result.unwrap_err(), "always");
        // 1 initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));

        let result: Result<(), &str> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope") }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
