//! Pull-based attempt sequence.
//!
//! [`Attempts`] hands out one [`Attempt`] per retry round and sleeps between
//! rounds only when the caller asks for the next one. Dropping it (or simply
//! not pulling again) abandons the session without waiting out any delay.

use crate::backoff::{clamp_to_budget, should_stop, ExponentialBackoff};
use crate::policy::Policy;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bookkeeping for one attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Attempt number (1-indexed).
    pub number: u32,
    /// Time waited before this attempt (zero for the first).
    pub delay: Duration,
    /// Time since the first attempt started.
    pub elapsed: Duration,
    /// Error recorded for the previous attempt, if any.
    pub last_error: Option<Arc<anyhow::Error>>,
    /// Cancellation signal of the session, if it has one.
    pub cancellation: Option<CancellationToken>,
}

impl Attempt {
    /// Whether this is the first attempt.
    pub fn is_first(&self) -> bool {
        self.number == 1
    }

    /// Whether the session's cancellation signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// A lazy, finite, single-use sequence of attempts.
#[derive(Debug)]
pub struct Attempts {
    policy: Policy,
    backoff: ExponentialBackoff,
    cancellation: Option<CancellationToken>,
    started: Option<Instant>,
    made: u32,
    last_error: Option<Arc<anyhow::Error>>,
    finished: bool,
}

impl Attempts {
    /// Create a sequence driven by `policy`.
    pub fn new(policy: Policy) -> Self {
        Self::with_backoff(ExponentialBackoff::new(policy))
    }

    /// Create a sequence around an existing delay schedule.
    pub fn with_backoff(backoff: ExponentialBackoff) -> Self {
        Self {
            policy: *backoff.policy(),
            backoff,
            cancellation: None,
            started: None,
            made: 0,
            last_error: None,
            finished: false,
        }
    }

    /// Stop the sequence as soon as `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The policy driving this sequence.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Number of attempts handed out so far.
    pub fn attempts_made(&self) -> u32 {
        self.made
    }

    /// Whether the cancellation signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Whether the sequence has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Record the failure of the attempt just handed out.
    ///
    /// The error shows up as `last_error` on the next attempt.
    pub fn record_error(&mut self, error: impl Into<anyhow::Error>) {
        self.last_error = Some(Arc::new(error.into()));
    }

    /// The most recently recorded error.
    pub fn last_error(&self) -> Option<&anyhow::Error> {
        self.last_error.as_deref()
    }

    /// Take the most recently recorded error out of the sequence.
    ///
    /// Attempts handed out earlier share the error. If one of them is still
    /// alive the error cannot be moved out, and the returned error only
    /// carries the rendered chain as a message: its concrete type is gone, so
    /// `downcast_ref` and the marker checks in [`crate::error`] no longer see
    /// through it. Use [`Attempts::take_shared_last_error`] to keep the type.
    pub fn take_last_error(&mut self) -> Option<anyhow::Error> {
        self.last_error.take().map(|shared| {
            Arc::try_unwrap(shared)
                .unwrap_or_else(|shared| anyhow::Error::msg(format!("{shared:#}")))
        })
    }

    /// Take the most recently recorded error out of the sequence, still shared
    /// with any attempt that holds it.
    pub fn take_shared_last_error(&mut self) -> Option<Arc<anyhow::Error>> {
        self.last_error.take()
    }

    /// Whether pulling again would wait for another attempt.
    ///
    /// Makes the same stop decision as [`Attempts::next`] at this instant, so
    /// a failure can be reported before the wait starts. A cancellation that
    /// fires during the wait still ends the sequence.
    pub fn will_retry(&self) -> bool {
        if self.finished || self.is_cancelled() || self.made == u32::MAX {
            return false;
        }
        let elapsed = self.started.map_or(Duration::ZERO, |started| started.elapsed());
        self.made == 0 || !should_stop(self.made, elapsed, &self.policy)
    }

    /// Wait out the delay for the next attempt and hand it out.
    ///
    /// Returns `None` once the policy says stop, once the cancellation signal
    /// fires (including while waiting), after `u32::MAX` attempts, and forever
    /// after that.
    pub async fn next(&mut self) -> Option<Attempt> {
        if self.finished || self.is_cancelled() || self.made == u32::MAX {
            return self.finish();
        }

        let started = *self.started.get_or_insert_with(Instant::now);

        let delay = if self.made == 0 {
            Duration::ZERO
        } else {
            let elapsed = started.elapsed();
            if should_stop(self.made, elapsed, &self.policy) {
                debug!(
                    attempts = self.made,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Retry budget spent"
                );
                return self.finish();
            }

            let delay = self.backoff.next().unwrap_or_default();
            let wait = clamp_to_budget(delay, elapsed, &self.policy);
            debug!(
                attempt = self.made,
                wait_ms = wait.as_millis() as u64,
                "Waiting before retry"
            );
            if !pause(wait, self.cancellation.clone()).await {
                debug!(attempt = self.made, "Retry cancelled while waiting");
                return self.finish();
            }
            wait
        };

        self.made += 1;
        Some(Attempt {
            number: self.made,
            delay,
            elapsed: started.elapsed(),
            last_error: self.last_error.clone(),
            cancellation: self.cancellation.clone(),
        })
    }

    /// Turn the sequence into a stream, for racing it against other futures.
    pub fn into_stream(self) -> BoxStream<'static, Attempt> {
        stream::unfold(self, |mut attempts| async move {
            attempts.next().await.map(|attempt| (attempt, attempts))
        })
        .boxed()
    }

    fn finish(&mut self) -> Option<Attempt> {
        self.finished = true;
        None
    }
}

/// Sleep for `wait`. Returns `false` if cancelled first.
async fn pause(wait: Duration, cancellation: Option<CancellationToken>) -> bool {
    match cancellation {
        Some(token) => {
            tokio::select! {
                _ = sleep(wait) => true,
                _ = token.cancelled() => false,
            }
        }
        None => {
            sleep(wait).await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use futures::StreamExt;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn fixed(initial: Duration, attempts: u32) -> Policy {
        Policy::new()
            .initial_delay(initial)
            .max_attempts(attempts)
            .multiplier(2.0)
            .no_jitter()
    }

    #[tokio::test(start_paused = true)]
    async fn test_numbers_and_delays() {
        let mut attempts = Attempts::new(fixed(ms(10), 4));
        let mut seen = Vec::new();

        while let Some(attempt) = attempts.next().await {
            seen.push((attempt.number, attempt.delay));
        }

        assert_eq!(
            seen,
            vec![(1, ms(0)), (2, ms(10)), (3, ms(20)), (4, ms(40))]
        );
        assert!(attempts.is_finished());
        assert!(attempts.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_not_delayed() {
        let start = Instant::now();
        let mut attempts = Attempts::new(fixed(Duration::from_secs(60), 3));

        let first = attempts.next().await.unwrap();
        assert!(first.is_first());
        assert_eq!(first.delay, Duration::ZERO);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_is_measured_from_first_attempt() {
        let mut attempts = Attempts::new(fixed(ms(10), 3));

        // Time before the first pull does not count.
        sleep(Duration::from_secs(5)).await;

        assert_eq!(attempts.next().await.unwrap().elapsed, Duration::ZERO);
        assert_eq!(attempts.next().await.unwrap().elapsed, ms(10));
        assert_eq!(attempts.next().await.unwrap().elapsed, ms(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_break_skips_remaining_waits() {
        let start = Instant::now();
        let mut attempts = Attempts::new(fixed(ms(100), 5));
        let mut pulled = 0;

        while let Some(attempt) = attempts.next().await {
            pulled += 1;
            if attempt.number == 2 {
                break;
            }
        }
        drop(attempts);

        assert_eq!(pulled, 2);
        // Only the wait before attempt 2 happened.
        assert_eq!(start.elapsed(), ms(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_carried_forward() {
        let mut attempts = Attempts::new(fixed(ms(1), 3));

        let first = attempts.next().await.unwrap();
        assert!(first.last_error.is_none());
        attempts.record_error(anyhow!("connection reset"));

        let second = attempts.next().await.unwrap();
        assert_eq!(
            second.last_error.as_deref().map(ToString::to_string),
            Some("connection reset".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_last_error_while_shared() {
        let mut attempts = Attempts::new(fixed(ms(1), 3));
        attempts.next().await.unwrap();
        attempts.record_error(anyhow!("disk full").context("writing snapshot"));

        let held = attempts.next().await.unwrap();
        let err = attempts.take_last_error().unwrap();

        assert!(held.last_error.is_some());
        assert_eq!(err.to_string(), "writing snapshot: disk full");
        assert!(attempts.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_shared_last_error_keeps_type() {
        let mut attempts = Attempts::new(fixed(ms(1), 3));
        attempts.next().await.unwrap();
        attempts.record_error(std::io::Error::other("disk full"));

        let held = attempts.next().await.unwrap();
        let shared = attempts.take_shared_last_error().unwrap();

        assert!(Arc::ptr_eq(&shared, held.last_error.as_ref().unwrap()));
        assert!(shared.downcast_ref::<std::io::Error>().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_last_error_unshared_keeps_type() {
        let mut attempts = Attempts::new(fixed(ms(1), 3));
        attempts.next().await.unwrap();
        attempts.record_error(std::io::Error::other("disk full"));
        drop(attempts.next().await.unwrap());

        let err = attempts.take_last_error().unwrap();
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_will_retry_matches_next() {
        let mut attempts = Attempts::new(fixed(ms(10), 2));
        assert!(attempts.will_retry());

        attempts.next().await.unwrap();
        assert!(attempts.will_retry());
        assert!(attempts.next().await.is_some());

        assert!(!attempts.will_retry());
        assert!(attempts.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_will_retry_respects_elapsed_budget() {
        let policy = Policy::new()
            .initial_delay(ms(10))
            .unlimited_attempts()
            .no_jitter()
            .max_elapsed(ms(100));
        let mut attempts = Attempts::new(policy);

        attempts.next().await.unwrap();
        assert!(attempts.will_retry());

        sleep(ms(100)).await;
        assert!(!attempts.will_retry());
        assert!(attempts.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_counter_stops_at_max() {
        let policy = Policy::new()
            .initial_delay(Duration::ZERO)
            .unlimited_attempts()
            .max_elapsed(Duration::ZERO);
        let mut attempts = Attempts::new(policy);

        attempts.next().await.unwrap();
        attempts.made = u32::MAX - 1;

        assert_eq!(attempts.next().await.unwrap().number, u32::MAX);
        assert!(!attempts.will_retry());
        assert!(attempts.next().await.is_none());
        assert_eq!(attempts.attempts_made(), u32::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_stops_sequence() {
        let policy = Policy::new()
            .initial_delay(ms(40))
            .multiplier(1.0)
            .no_jitter()
            .unlimited_attempts()
            .max_elapsed(ms(100));

        let start = Instant::now();
        let mut attempts = Attempts::new(policy);
        let mut count = 0;
        while attempts.next().await.is_some() {
            count += 1;
        }

        // 0, 40, 80, then the 20ms left in the budget.
        assert_eq!(count, 4);
        assert_eq!(start.elapsed(), ms(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();

        let mut attempts = Attempts::new(fixed(ms(10), 3)).with_cancellation(token);
        assert!(attempts.next().await.is_none());
        assert_eq!(attempts.attempts_made(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_wait() {
        let token = CancellationToken::new();
        let mut attempts =
            Attempts::new(fixed(Duration::from_secs(30), 3)).with_cancellation(token.clone());

        let first = attempts.next().await.unwrap();
        assert!(!first.is_cancelled());

        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(ms(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(attempts.next().await.is_none());
        assert_eq!(start.elapsed(), ms(50));
        assert!(attempts.is_cancelled());
        assert!(first.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_yields_same_sequence() {
        let numbers: Vec<u32> = Attempts::new(fixed(ms(5), 3))
            .into_stream()
            .map(|attempt| attempt.number)
            .collect()
            .await;

        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_sequences_race() {
        let mut fast = Attempts::new(fixed(ms(10), 3)).into_stream();
        let mut slow = Attempts::new(fixed(ms(25), 3)).into_stream();

        // Both hand out their first attempt immediately.
        assert_eq!(fast.next().await.unwrap().number, 1);
        assert_eq!(slow.next().await.unwrap().number, 1);

        let winner = tokio::select! {
            attempt = fast.next() => ("fast", attempt.unwrap().delay),
            attempt = slow.next() => ("slow", attempt.unwrap().delay),
        };
        assert_eq!(winner, ("fast", ms(10)));
    }
}
