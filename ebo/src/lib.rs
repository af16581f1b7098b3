//! # ebo
//!
//! Exponential backoff retries for async operations.
//!
//! This crate re-runs fallible operations with growing, optionally
//! randomised delays until they succeed, a limit is reached, or the caller
//! cancels.
//!
//! ## Core Concepts
//!
//! - **[`Policy`]**: Timing and limits of a retry session
//! - **[`ExponentialBackoff`]**: The delay schedule derived from a policy
//! - **[`Attempts`]**: Pull-based sequence of attempts
//! - **[`retry`]**: Execute operations with automatic retries
//! - **[`PermanentError`]**: Marks failures that must not be retried
//!
//! ## Stop Conditions
//!
//! A session ends at the first of:
//!
//! - the operation succeeds
//! - the operation fails with an error marked [`permanent`]
//! - `max_attempts` attempts have been made
//! - `max_elapsed` has passed since the first attempt
//! - the cancellation token fires
//!
//! ## Example
//!
//! ```ignore
//! use ebo::{retry, Policy};
//! use std::time::Duration;
//!
//! let policy = Policy::new()
//!     .initial_delay(Duration::from_millis(100))
//!     .max_attempts(5);
//!
//! let body = retry(policy, || async {
//!     fetch().await
//! }).await?;
//! ```
//!
//! ## Pull-based Loop
//!
//! ```ignore
//! use ebo::{attempts, Policy};
//!
//! let mut sequence = attempts(Policy::database());
//! while let Some(attempt) = sequence.next().await {
//!     match connect().await {
//!         Ok(conn) => return Ok(conn),
//!         Err(e) => sequence.record_error(e),
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod attempts;
pub mod backoff;
pub mod condition;
pub mod error;
pub mod executor;
pub mod logging;
pub mod policy;

// Re-exports
pub use attempts::{Attempt, Attempts};
pub use backoff::{clamp_to_budget, next_delay, should_stop, ExponentialBackoff};
pub use condition::{mark_permanent, retry_with_condition, Conditional, RetryPredicate};
pub use error::{is_cancelled, is_exhausted, is_permanent, permanent, PermanentError, RetryError};
pub use executor::{
    attempts, attempts_with_cancellation, quick_retry, retry, retry_with_backoff,
    retry_with_cancellation, retry_with_logging, run_attempts, run_with_attempts,
    run_with_attempts_cancellable, Retry,
};
pub use logging::{failure_line, AttemptLogger, MemoryLogger, TracingLogger};
pub use policy::{Policy, PolicyOption, Preset, UnknownPreset};

pub use tokio_util::sync::CancellationToken;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        permanent, retry, retry_with_cancellation, Attempts, CancellationToken, Policy, Retry,
        RetryError, RetryPredicate,
    };
}
