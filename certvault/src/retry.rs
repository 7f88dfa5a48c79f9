//! Fibonacci backoff for lock operations

use certvault_core::OpContext;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::StorageError;

/// Retry schedule applied to the remote steps of `lock` and `unlock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First delay; later delays follow the Fibonacci sequence scaled by it
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Give up after this many attempts; unbounded when `None`, leaving the
    /// context deadline as the only limit
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn delays(&self) -> FibonacciDelays {
        FibonacciDelays {
            base: self.base_delay,
            max: self.max_delay,
            current: 1,
            next: 1,
        }
    }
}

/// `base * 1, 1, 2, 3, 5, 8, ...` capped at `max`
#[derive(Debug, Clone)]
pub struct FibonacciDelays {
    base: Duration,
    max: Duration,
    current: u32,
    next: u32,
}

impl Iterator for FibonacciDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.base.saturating_mul(self.current).min(self.max);
        let following = self.current.saturating_add(self.next);
        self.current = self.next;
        self.next = following;
        Some(delay)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy or context gives out. Exhaustion surfaces as `Fatal` carrying the
/// last error.
pub async fn retry<T, F, Fut>(
    ctx: &OpContext,
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut delays = policy.delays();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(exhausted(operation, attempt, err));
        }

        let delay = delays.next().unwrap_or(policy.max_delay);
        if ctx.remaining().is_some_and(|left| left < delay) {
            return Err(exhausted(operation, attempt, err));
        }

        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );

        if ctx.sleep(delay).await.is_err() {
            return Err(exhausted(operation, attempt, err));
        }
    }
}

fn exhausted(operation: &str, attempts: u32, last: StorageError) -> StorageError {
    StorageError::Fatal {
        reason: format!("{} gave up after {} attempts", operation, attempts),
        last_error: Some(Box::new(last)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certvault_core::{BackendError, ErrorCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts: None,
        }
    }

    fn unavailable() -> StorageError {
        BackendError::new(ErrorCode::Unavailable, "backend busy").into()
    }

    #[test]
    fn test_fibonacci_schedule() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
        };

        let delays: Vec<u64> = policy.delays().take(8).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 1, 2, 3, 5, 8, 10, 10]);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = &AtomicU32::new(0);
        let ctx = OpContext::with_timeout(Duration::from_secs(5));

        let value = retry(&ctx, &quick(), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(unavailable())
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let ctx = OpContext::background();

        let result: Result<(), _> = retry(&ctx, &quick(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::not_found("k"))
        })
        .await;

        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..quick()
        };

        let result: Result<(), _> = retry(&OpContext::background(), &policy, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;

        match result {
            Err(StorageError::Fatal { last_error, .. }) => {
                assert!(last_error.unwrap().is_transient());
            }
            other => panic!("expected fatal, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_loop() {
        let ctx = OpContext::with_timeout(Duration::from_millis(30));
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(5),
            max_attempts: None,
        };

        let result: Result<(), _> =
            retry(&ctx, &policy, "test", || async { Err(unavailable()) }).await;

        assert!(matches!(result, Err(StorageError::Fatal { .. })));
    }
}
