//! Per-operation cancellation and deadline

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an operation was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

/// Bounds the lifetime of a storage or lock operation.
///
/// Cloning shares the cancellation token, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl OpContext {
    /// No deadline, cancellable only through [`OpContext::cancel`]
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// Derived context with a deadline no later than `timeout` from now.
    /// Cancelling the parent cancels the child.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current < candidate => current,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Err if cancelled or past the deadline
    pub fn check(&self) -> Result<(), ContextError> {
        if self.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ContextError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context ends first
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ContextError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
                res = tokio::time::timeout_at(deadline, fut) => {
                    res.map_err(|_| ContextError::DeadlineExceeded)
                }
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
                value = fut => Ok(value),
            },
        }
    }

    /// Sleep for `duration`, returning early with an error if the context ends
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_within_deadline() {
        let ctx = OpContext::with_timeout(Duration::from_secs(5));
        let value = ctx.run(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_hits_deadline() {
        let ctx = OpContext::with_timeout(Duration::from_millis(10));
        let result = ctx.run(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancelled_context_rejects_work() {
        let ctx = OpContext::background();
        ctx.cancel();
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
        assert_eq!(ctx.run(async {}).await, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_inherits_earlier_deadline_and_cancellation() {
        let parent = OpContext::with_timeout(Duration::from_millis(50));
        let child = parent.child(Duration::from_secs(60));
        assert!(child.remaining().unwrap() <= Duration::from_millis(50));

        parent.cancel();
        assert_eq!(child.check(), Err(ContextError::Cancelled));
    }

    #[test]
    fn test_background_is_unbounded() {
        let ctx = OpContext::background();
        assert!(ctx.remaining().is_none());
        assert!(ctx.check().is_ok());
    }
}
