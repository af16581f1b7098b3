//! Conditional retry.
//!
//! A [`RetryPredicate`] decides which failures deserve another attempt.
//! Rejected failures are marked permanent, so the drivers stop on them.

use crate::error::permanent;
use crate::executor::Retry;
use crate::policy::Policy;
use std::future::Future;
use std::sync::Arc;

/// Decides whether a failure is worth retrying.
pub trait RetryPredicate: Send + Sync {
    /// Return `true` to retry after `error`.
    fn is_retryable(&self, error: &anyhow::Error) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&anyhow::Error) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &anyhow::Error) -> bool {
        self(error)
    }
}

/// Mark `error` permanent unless `predicate` accepts it.
pub fn mark_permanent<P>(error: anyhow::Error, predicate: &P) -> anyhow::Error
where
    P: RetryPredicate + ?Sized,
{
    if predicate.is_retryable(&error) {
        error
    } else {
        permanent(error)
    }
}

/// An operation whose rejected failures come back marked permanent.
pub struct Conditional<F, P> {
    operation: F,
    predicate: Arc<P>,
}

impl<F, P> Conditional<F, P> {
    /// Wrap `operation` with `predicate`.
    pub fn new(operation: F, predicate: P) -> Self {
        Self {
            operation,
            predicate: Arc::new(predicate),
        }
    }
}

impl<F, Fut, T, E, P> Conditional<F, P>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
    P: RetryPredicate,
{
    /// Invoke the wrapped operation once.
    pub fn call(&mut self) -> impl Future<Output = anyhow::Result<T>> {
        let pending = (self.operation)();
        let predicate = Arc::clone(&self.predicate);
        async move {
            pending
                .await
                .map_err(|error| mark_permanent(error.into(), &*predicate))
        }
    }
}

/// Execute an operation with retries, stopping at the first failure
/// `predicate` rejects. That failure is returned as-is.
pub async fn retry_with_condition<F, Fut, T, E, P>(
    policy: Policy,
    predicate: P,
    operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
    P: RetryPredicate,
{
    Retry::new(policy).run_with_condition(predicate, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{is_permanent, RetryError};
    use anyhow::anyhow;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_test::assert_err;

    fn policy(attempts: u32) -> Policy {
        Policy::new()
            .initial_delay(Duration::from_millis(10))
            .max_attempts(attempts)
            .no_jitter()
    }

    fn is_timeout(error: &anyhow::Error) -> bool {
        error
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
    }

    #[test]
    fn test_mark_permanent() {
        let accepted = mark_permanent(anyhow!("flaky"), &|_: &anyhow::Error| true);
        assert!(!is_permanent(&accepted));

        let rejected = mark_permanent(anyhow!("bad request"), &|_: &anyhow::Error| false);
        assert!(is_permanent(&rejected));
    }

    #[test]
    fn test_mark_permanent_trait_object() {
        let predicate: Box<dyn RetryPredicate> = Box::new(is_timeout);
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");

        assert!(!is_permanent(&mark_permanent(timeout.into(), &*predicate)));
        assert!(is_permanent(&mark_permanent(anyhow!("other"), &*predicate)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejecting_predicate_calls_once() {
        let calls = AtomicU32::new(0);
        let result = retry_with_condition(policy(10), |_: &anyhow::Error| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow!("fatal")) }
        })
        .await;

        let err = assert_err!(result);
        assert_eq!(err.to_string(), "fatal");
        assert!(!is_permanent(&err));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepting_predicate_retries() {
        let calls = AtomicU32::new(0);
        let result = retry_with_condition(policy(4), is_timeout, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "slow"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_sees_original_error() {
        let calls = AtomicU32::new(0);
        let result = retry_with_condition(policy(5), is_timeout, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                let kind = if n == 1 {
                    io::ErrorKind::TimedOut
                } else {
                    io::ErrorKind::PermissionDenied
                };
                Err::<(), _>(io::Error::new(kind, "io"))
            }
        })
        .await;

        let err = assert_err!(result);
        assert_eq!(
            err.downcast_ref::<io::Error>().map(io::Error::kind),
            Some(io::ErrorKind::PermissionDenied)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_with_cancellation() {
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();

        let result = Retry::new(policy(3))
            .with_cancellation(token)
            .run_with_condition(|_: &anyhow::Error| true, || async {
                Ok::<_, anyhow::Error>(())
            })
            .await;

        assert_eq!(
            assert_err!(result).downcast_ref::<RetryError>(),
            Some(&RetryError::Cancelled)
        );
    }
}
