//! Logging of failed attempts.
//!
//! A logger sees every failure the session decides to retry, reported before
//! the wait for the next attempt starts. The failure that ends the session is
//! returned to the caller instead, and a successful attempt is never logged.

use parking_lot::Mutex;
use std::fmt;

/// Receives failed attempts that are about to be retried.
pub trait AttemptLogger: Send + Sync {
    /// Called with the number of the failed attempt and its error.
    fn log_failure(&self, attempt: u32, error: &anyhow::Error);
}

impl<F> AttemptLogger for F
where
    F: Fn(u32, &anyhow::Error) + Send + Sync,
{
    fn log_failure(&self, attempt: u32, error: &anyhow::Error) {
        self(attempt, error)
    }
}

/// Render the standard log line for a failed attempt.
pub fn failure_line(attempt: u32, error: &anyhow::Error) -> String {
    format!("Attempt {attempt} failed: {error}")
}

/// Logger that emits a `tracing` warning per failed attempt.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    operation: String,
}

impl TracingLogger {
    /// Create a logger tagged with the name of the operation being retried.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    /// Get the operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("retry")
    }
}

impl AttemptLogger for TracingLogger {
    fn log_failure(&self, attempt: u32, error: &anyhow::Error) {
        tracing::warn!(
            operation = %self.operation,
            attempt,
            error = %error,
            "{}",
            failure_line(attempt, error)
        );
    }
}

/// Logger that keeps the log lines in memory.
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    /// Create an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the lines logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Number of lines logged so far.
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl fmt::Debug for MemoryLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLogger")
            .field("line_count", &self.len())
            .finish()
    }
}

impl AttemptLogger for MemoryLogger {
    fn log_failure(&self, attempt: u32, error: &anyhow::Error) {
        self.lines.lock().push(failure_line(attempt, error));
    }
}
