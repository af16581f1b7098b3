//! Retry executor for running operations with retries.
//!
//! Every entry point here drives the same loop over an [`Attempts`]
//! sequence, so the blocking, cancellable and callback shapes cannot drift
//! apart in how they wait, count or stop.

use crate::attempts::{Attempt, Attempts};
use crate::backoff::ExponentialBackoff;
use crate::condition::{Conditional, RetryPredicate};
use crate::error::{is_permanent, unwrap_permanent, RetryError};
use crate::logging::AttemptLogger;
use crate::policy::Policy;
use rand::RngCore;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builder for a retry session.
///
/// # Example
///
/// ```ignore
/// use ebo::{Policy, Retry};
///
/// let token = CancellationToken::new();
/// let body = Retry::new(Policy::api())
///     .with_cancellation(token.clone())
///     .run(|| fetch_manifest())
///     .await?;
/// ```
pub struct Retry {
    policy: Policy,
    cancellation: Option<CancellationToken>,
    logger: Option<Arc<dyn AttemptLogger>>,
    rng: Option<Box<dyn RngCore + Send>>,
}

impl Retry {
    /// Create a session builder. The policy is copied.
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            cancellation: None,
            logger: None,
            rng: None,
        }
    }

    /// Stop retrying once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Report failed attempts that are about to be retried.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn AttemptLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Draw jitter from `rng` instead of an entropy-seeded generator.
    #[must_use]
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Some(Box::new(rng));
        self
    }

    /// Get the policy.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Build the attempt sequence for this session.
    pub fn attempts(self) -> Attempts {
        let backoff = match self.rng {
            Some(rng) => ExponentialBackoff::with_rng(self.policy, rng),
            None => ExponentialBackoff::new(self.policy),
        };
        let attempts = Attempts::with_backoff(backoff);
        match self.cancellation {
            Some(token) => attempts.with_cancellation(token),
            None => attempts,
        }
    }

    /// Run `operation` until it succeeds or the session ends.
    pub async fn run<F, Fut, T, E>(self, mut operation: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.run_with_attempts(|_| operation()).await
    }

    /// Run `callback` with each attempt's bookkeeping.
    pub async fn run_with_attempts<F, Fut, T, E>(mut self, callback: F) -> anyhow::Result<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let logger = self.logger.take();
        drive(self.attempts(), logger, callback).await
    }

    /// Run `operation`, giving up immediately on errors `predicate` rejects.
    pub async fn run_with_condition<F, Fut, T, E, P>(
        self,
        predicate: P,
        operation: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
        P: RetryPredicate,
    {
        let mut conditional = Conditional::new(operation, predicate);
        self.run(|| conditional.call()).await
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("policy", &self.policy)
            .field("cancellation", &self.cancellation)
            .field("has_logger", &self.logger.is_some())
            .field("has_rng", &self.rng.is_some())
            .finish()
    }
}

/// Drive a sequence someone else built.
///
/// Useful with a sequence that was already partly consumed. If it hands out
/// no attempt at all the result is [`RetryError::Exhausted`].
pub async fn run_attempts<F, Fut, T, E>(attempts: Attempts, callback: F) -> anyhow::Result<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    drive(attempts, None, callback).await
}

async fn drive<F, Fut, T, E>(
    mut attempts: Attempts,
    logger: Option<Arc<dyn AttemptLogger>>,
    mut callback: F,
) -> anyhow::Result<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    while let Some(attempt) = attempts.next().await {
        let number = attempt.number;

        debug!(
            attempt = number,
            max_attempts = attempts.policy().max_attempts,
            delay_ms = attempt.delay.as_millis() as u64,
            "Executing retry attempt"
        );

        match callback(attempt).await {
            Ok(value) => {
                if number > 1 {
                    info!(attempts = number, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let error: anyhow::Error = error.into();
                if is_permanent(&error) {
                    warn!(attempt = number, error = %error, "Error not retryable");
                    return Err(unwrap_permanent(error));
                }
                debug!(attempt = number, error = %error, "Attempt failed");
                // Reported before the wait, so a cancelled wait cannot lose it.
                if let Some(logger) = &logger {
                    if attempts.will_retry() {
                        logger.log_failure(number, &error);
                    }
                }
                attempts.record_error(error);
            }
        }
    }

    if attempts.is_cancelled() {
        warn!(attempts = attempts.attempts_made(), "Retry cancelled");
        return Err(RetryError::Cancelled.into());
    }

    match attempts.take_last_error() {
        Some(error) => {
            warn!(
                attempts = attempts.attempts_made(),
                error = %error,
                "Retry exhausted"
            );
            Err(error)
        }
        None => Err(RetryError::Exhausted.into()),
    }
}

/// Execute an operation with retries.
///
/// # Example
///
/// ```ignore
/// use ebo::{retry, Policy};
///
/// let policy = Policy::new().max_attempts(5).initial_delay(Duration::from_secs(1));
/// retry(policy, || async { ping().await }).await?;
/// ```
pub async fn retry<F, Fut, T, E>(policy: Policy, operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    Retry::new(policy).run(operation).await
}

/// Execute an operation with retries until `token` is cancelled.
///
/// Once cancellation is observed the result is [`RetryError::Cancelled`],
/// whatever the last attempt returned.
pub async fn retry_with_cancellation<F, Fut, T, E>(
    token: &CancellationToken,
    policy: Policy,
    operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    Retry::new(policy)
        .with_cancellation(token.clone())
        .run(operation)
        .await
}

/// Execute an operation with retries, reporting each retried failure to
/// `logger` as `Attempt N failed: <error>`.
///
/// A failure is reported as soon as it is known another attempt will follow,
/// before the wait, so cancelling during the wait does not drop it.
pub async fn retry_with_logging<F, Fut, T, E>(
    policy: Policy,
    logger: Arc<dyn AttemptLogger>,
    operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    Retry::new(policy).with_logger(logger).run(operation).await
}

/// Create a pull-based attempt sequence.
pub fn attempts(policy: Policy) -> Attempts {
    Retry::new(policy).attempts()
}

/// Create a pull-based attempt sequence that ends when `token` is cancelled.
pub fn attempts_with_cancellation(token: &CancellationToken, policy: Policy) -> Attempts {
    Retry::new(policy)
        .with_cancellation(token.clone())
        .attempts()
}

/// Run `callback` once per attempt until it succeeds.
///
/// A callback error marked permanent ends the session immediately.
pub async fn run_with_attempts<F, Fut, T, E>(policy: Policy, callback: F) -> anyhow::Result<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    Retry::new(policy).run_with_attempts(callback).await
}

/// [`run_with_attempts`] that stops when `token` is cancelled.
pub async fn run_with_attempts_cancellable<F, Fut, T, E>(
    token: &CancellationToken,
    policy: Policy,
    callback: F,
) -> anyhow::Result<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    Retry::new(policy)
        .with_cancellation(token.clone())
        .run_with_attempts(callback)
        .await
}

/// Retry with fixed settings: 100ms doubling up to 10s, no jitter, at most
/// `max_attempts` attempts and no time limit.
///
/// With `max_attempts == 0` the operation is never invoked and the result is
/// [`RetryError::Exhausted`].
pub async fn retry_with_backoff<F, Fut, T, E>(max_attempts: u32, operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    if max_attempts == 0 {
        return Err(RetryError::Exhausted.into());
    }

    let policy = Policy::new()
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(10))
        .multiplier(2.0)
        .no_jitter()
        .max_elapsed(Duration::ZERO)
        .max_attempts(max_attempts);
    retry(policy, operation).await
}

/// Retry a fast operation: 100ms doubling up to 5s, 5 attempts, 30% jitter.
pub async fn quick_retry<F, Fut, T, E>(operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let policy = Policy::new()
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(5))
        .max_attempts(5)
        .multiplier(2.0)
        .jitter(0.3);
    retry(policy, operation).await
}
