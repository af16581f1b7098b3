//! Backoff engine.
//!
//! Pure timing decisions shared by every driver: how long to wait next, and
//! whether to stop. [`ExponentialBackoff`] threads the delay from one step to
//! the next so the drivers never duplicate this arithmetic.

use crate::policy::Policy;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::fmt;
use std::time::Duration;

/// Compute the delay that follows `current`.
///
/// The delay grows by the policy multiplier and is capped at `max_delay`.
/// With jitter enabled the result is drawn uniformly from
/// `[grown * (1 - jitter), grown * (1 + jitter)]`, floored at zero. A jitter
/// factor outside `[0, 1]` is clamped into that range.
pub fn next_delay<R: Rng>(current: Duration, policy: &Policy, rng: &mut R) -> Duration {
    let raw = current.as_secs_f64() * policy.multiplier;
    let grown = if raw.is_nan() || raw >= policy.max_delay.as_secs_f64() {
        policy.max_delay
    } else if raw <= 0.0 {
        Duration::ZERO
    } else {
        secs_to_duration(raw)
    };

    let jitter = if policy.jitter.is_nan() {
        0.0
    } else {
        policy.jitter.clamp(0.0, 1.0)
    };
    if jitter == 0.0 || grown.is_zero() {
        return grown;
    }

    let grown = grown.as_secs_f64();
    let delta = jitter * grown;
    let low = (grown - delta).max(0.0);
    let high = grown + delta;
    secs_to_duration(rng.gen_range(low..=high))
}

/// Decide whether the session is over after `attempts` attempts.
///
/// Both limits are inclusive: reaching `max_attempts` means no extra try.
pub fn should_stop(attempts: u32, elapsed: Duration, policy: &Policy) -> bool {
    let attempts_spent = policy
        .attempt_limit()
        .is_some_and(|limit| attempts >= limit);
    let time_spent = policy
        .elapsed_limit()
        .is_some_and(|limit| elapsed >= limit);
    attempts_spent || time_spent
}

/// Shorten `delay` so the wait ends no later than the time budget.
pub fn clamp_to_budget(delay: Duration, elapsed: Duration, policy: &Policy) -> Duration {
    match policy.elapsed_limit() {
        Some(limit) => delay.min(limit.saturating_sub(elapsed)),
        None => delay,
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// The delay schedule for one retry session.
///
/// Yields `initial_delay` first, then each following delay via
/// [`next_delay`]. Never ends; the stop decision belongs to [`should_stop`].
pub struct ExponentialBackoff {
    policy: Policy,
    current: Duration,
    rng: Box<dyn RngCore + Send>,
}

impl ExponentialBackoff {
    /// Create a schedule with an entropy-seeded generator.
    pub fn new(policy: Policy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Create a schedule that draws jitter from `rng`.
    pub fn with_rng(policy: Policy, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            policy,
            current: policy.initial_delay,
            rng: Box::new(rng),
        }
    }

    /// The policy driving this schedule.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The delay the next call to `next` will return.
    pub fn peek(&self) -> Duration {
        self.current
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current = next_delay(delay, &self.policy, &mut self.rng);
        Some(delay)
    }
}

impl fmt::Debug for ExponentialBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialBackoff")
            .field("policy", &self.policy)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
