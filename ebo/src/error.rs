//! Retry error types.
//!
//! Operations hand their failures to the drivers as [`anyhow::Error`]. The
//! drivers never look at what an error *is*, only at whether its cause chain
//! carries one of the markers defined here.

use thiserror::Error;

/// Terminal errors produced by the drivers themselves.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RetryError {
    /// The cancellation signal fired before the session resolved.
    #[error("retry cancelled")]
    Cancelled,

    /// No attempt ran, so there is no operation error to report.
    #[error("all retry attempts failed")]
    Exhausted,
}

/// Marks an error as not worth retrying.
///
/// Any error whose cause chain contains a `PermanentError` stops the retry
/// loop immediately. The driver returns the wrapped cause, not the wrapper.
#[derive(Debug, Error)]
#[error("non-retryable error: {source}")]
pub struct PermanentError {
    #[source]
    source: anyhow::Error,
}

impl PermanentError {
    /// Wrap an error.
    pub fn new(source: impl Into<anyhow::Error>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Get the wrapped error.
    pub fn cause(&self) -> &anyhow::Error {
        &self.source
    }

    /// Unwrap into the original error.
    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

/// Wrap an error so that the drivers give up on it right away.
pub fn permanent(err: impl Into<anyhow::Error>) -> anyhow::Error {
    PermanentError::new(err).into()
}

/// Check whether a [`PermanentError`] sits anywhere in the cause chain.
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<PermanentError>())
}

/// Check whether the error is (or wraps) [`RetryError::Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    has_marker(err, RetryError::Cancelled)
}

/// Check whether the error is (or wraps) [`RetryError::Exhausted`].
pub fn is_exhausted(err: &anyhow::Error) -> bool {
    has_marker(err, RetryError::Exhausted)
}

fn has_marker(err: &anyhow::Error, marker: RetryError) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<RetryError>())
        .any(|found| *found == marker)
}

/// Strip the permanent marker off an error.
///
/// When the marker is the error itself (possibly under `anyhow` context) the
/// original cause is returned. A marker buried inside a foreign error's
/// `source()` chain cannot be moved out, so the error is returned as is.
pub(crate) fn unwrap_permanent(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<PermanentError>() {
        Ok(permanent) => permanent.into_inner(),
        Err(err) => err,
    }
}
