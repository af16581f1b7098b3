//! # ebo-http
//!
//! HTTP client that retries failed requests with [`ebo`] backoff.
//!
//! Which responses count as failures is decided from the status code alone:
//! by default server errors and `429 Too Many Requests`. Other responses are
//! handed back untouched. Timeouts and refused connections are retried too;
//! every other transport error stops the session.
//!
//! ## Example
//!
//! ```ignore
//! use ebo_http::RetryClientBuilder;
//! use std::time::Duration;
//!
//! let client = RetryClientBuilder::new()
//!     .max_attempts(4)
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let response = client.get("https://api.example.com/status").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod status;

pub use client::{is_retryable_error, RetryClient, RetryClientBuilder};
pub use status::{is_retryable_status, parse_retry_after, ResponseChecker, StatusError};
