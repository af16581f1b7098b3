//! Retry policy.
//!
//! A [`Policy`] is a plain value: defaults plus whatever overrides were
//! applied, in order. Drivers copy it at invocation time, so changing a policy
//! afterwards never affects a session that is already running.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Parameters governing delay growth and stopping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Delay before the second attempt.
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,
    /// Ceiling applied after each growth step.
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,
    /// Maximum number of attempts (0 for no limit).
    pub max_attempts: u32,
    /// Growth factor per attempt (1.0 keeps the delay constant).
    pub multiplier: f64,
    /// Maximum total time for the session (zero for no limit).
    #[serde(with = "duration_serde")]
    pub max_elapsed: Duration,
    /// Fraction of each delay that may be randomly added or subtracted (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(5 * 60),
            jitter: 0.5,
        }
    }
}

impl Policy {
    /// Create a policy with the default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from defaults and apply `options` in order.
    #[must_use]
    pub fn with_options(options: impl IntoIterator<Item = PolicyOption>) -> Self {
        Self::default().apply(options)
    }

    /// Apply `options` in order. Later options win.
    #[must_use]
    pub fn apply(self, options: impl IntoIterator<Item = PolicyOption>) -> Self {
        options
            .into_iter()
            .fold(self, |policy, option| option.apply(policy))
    }

    /// Set the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Set the attempt limit (0 for no limit).
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub fn multiplier(mut self, m: f64) -> Self {
        self.multiplier = m;
        self
    }

    /// Set the jitter factor (0 disables randomization).
    #[must_use]
    pub fn jitter(mut self, j: f64) -> Self {
        self.jitter = j;
        self
    }

    /// Set the total time budget (zero for no limit).
    #[must_use]
    pub fn max_elapsed(mut self, d: Duration) -> Self {
        self.max_elapsed = d;
        self
    }

    /// Disable jitter.
    #[must_use]
    pub fn no_jitter(self) -> Self {
        self.jitter(0.0)
    }

    /// Remove the attempt limit. Pair with [`Policy::max_elapsed`] or a
    /// cancellation token.
    #[must_use]
    pub fn unlimited_attempts(self) -> Self {
        self.max_attempts(0)
    }

    /// Wait the same delay before every retry.
    #[must_use]
    pub fn constant_delay(self) -> Self {
        self.multiplier(1.0).no_jitter()
    }

    /// Grow the delay by `factor`, with a moderate jitter.
    #[must_use]
    pub fn exponential(self, factor: f64) -> Self {
        self.multiplier(factor).jitter(0.25)
    }

    /// Retry without an attempt limit until `d` has elapsed.
    #[must_use]
    pub fn timeout(self, d: Duration) -> Self {
        self.max_elapsed(d).unlimited_attempts()
    }

    /// Apply a named preset.
    #[must_use]
    pub fn preset(self, preset: Preset) -> Self {
        self.apply(preset.options())
    }

    /// Defaults with the [`Preset::Quick`] bundle applied.
    #[must_use]
    pub fn quick() -> Self {
        Self::default().preset(Preset::Quick)
    }

    /// Defaults with the [`Preset::Gentle`] bundle applied.
    #[must_use]
    pub fn gentle() -> Self {
        Self::default().preset(Preset::Gentle)
    }

    /// Defaults with the [`Preset::Aggressive`] bundle applied.
    #[must_use]
    pub fn aggressive() -> Self {
        Self::default().preset(Preset::Aggressive)
    }

    /// Defaults with the [`Preset::Api`] bundle applied.
    #[must_use]
    pub fn api() -> Self {
        Self::default().preset(Preset::Api)
    }

    /// Defaults with the [`Preset::Database`] bundle applied.
    #[must_use]
    pub fn database() -> Self {
        Self::default().preset(Preset::Database)
    }

    /// Defaults with the [`Preset::HttpStatus`] bundle applied.
    #[must_use]
    pub fn http_status() -> Self {
        Self::default().preset(Preset::HttpStatus)
    }

    /// The attempt limit, if any.
    pub fn attempt_limit(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    /// The total time budget, if any.
    pub fn elapsed_limit(&self) -> Option<Duration> {
        (!self.max_elapsed.is_zero()).then_some(self.max_elapsed)
    }
}

/// A single override, as data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicyOption {
    /// See [`Policy::initial_delay`].
    InitialDelay(Duration),
    /// See [`Policy::max_delay`].
    MaxDelay(Duration),
    /// See [`Policy::max_attempts`].
    MaxAttempts(u32),
    /// See [`Policy::multiplier`].
    Multiplier(f64),
    /// See [`Policy::jitter`].
    Jitter(f64),
    /// See [`Policy::max_elapsed`].
    MaxElapsed(Duration),
    /// See [`Policy::preset`].
    Preset(Preset),
}

impl PolicyOption {
    /// Apply this option to a policy.
    #[must_use]
    pub fn apply(self, policy: Policy) -> Policy {
        match self {
            Self::InitialDelay(d) => policy.initial_delay(d),
            Self::MaxDelay(d) => policy.max_delay(d),
            Self::MaxAttempts(n) => policy.max_attempts(n),
            Self::Multiplier(m) => policy.multiplier(m),
            Self::Jitter(j) => policy.jitter(j),
            Self::MaxElapsed(d) => policy.max_elapsed(d),
            Self::Preset(preset) => policy.preset(preset),
        }
    }
}

impl From<Preset> for PolicyOption {
    fn from(preset: Preset) -> Self {
        Self::Preset(preset)
    }
}

/// Named override bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Fast operations that should fail quickly.
    Quick,
    /// Non-critical background work.
    Gentle,
    /// Critical operations that need quick recovery.
    Aggressive,
    /// External API calls.
    Api,
    /// Database connections and queries.
    Database,
    /// HTTP requests retried on status codes.
    HttpStatus,
}

impl Preset {
    /// Every preset.
    pub const ALL: [Preset; 6] = [
        Preset::Quick,
        Preset::Gentle,
        Preset::Aggressive,
        Preset::Api,
        Preset::Database,
        Preset::HttpStatus,
    ];

    /// The primitive overrides this preset stands for.
    pub fn options(self) -> Vec<PolicyOption> {
        let ms = Duration::from_millis;
        let secs = Duration::from_secs;
        let (initial, max, attempts, multiplier, jitter) = match self {
            Preset::Quick => (ms(50), secs(1), 3, 2.0, 0.1),
            Preset::Gentle => (secs(2), secs(30), 5, 2.0, 0.5),
            Preset::Aggressive => (ms(100), secs(5), 20, 1.5, 0.1),
            Preset::Api => (ms(200), secs(5), 3, 2.0, 0.3),
            Preset::Database => (secs(1), secs(30), 10, 2.0, 0.5),
            Preset::HttpStatus => (ms(500), secs(10), 5, 2.0, 0.25),
        };

        let mut options = vec![
            PolicyOption::InitialDelay(initial),
            PolicyOption::MaxDelay(max),
            PolicyOption::MaxAttempts(attempts),
            PolicyOption::Multiplier(multiplier),
            PolicyOption::Jitter(jitter),
        ];
        if self == Preset::Database {
            options.push(PolicyOption::MaxElapsed(secs(2 * 60)));
        }
        options
    }

    /// The snake_case name of this preset.
    pub fn name(self) -> &'static str {
        match self {
            Preset::Quick => "quick",
            Preset::Gentle => "gentle",
            Preset::Aggressive => "aggressive",
            Preset::Api => "api",
            Preset::Database => "database",
            Preset::HttpStatus => "http_status",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a preset name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown retry preset: {0}")]
pub struct UnknownPreset(pub String);

impl FromStr for Preset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| UnknownPreset(s.to_string()))
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
