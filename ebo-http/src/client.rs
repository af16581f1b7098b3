//! HTTP client with automatic retries.

use crate::status::{is_retryable_status, ResponseChecker, StatusError};
use ebo::{Policy, Retry};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Whether a request failure is worth another attempt.
///
/// Flagged statuses, timeouts and failed connections are retried. Any other
/// transport error ends the session.
pub fn is_retryable_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        if let Some(err) = cause.downcast_ref::<reqwest::Error>() {
            return err.is_timeout() || err.is_connect();
        }
        cause.is::<StatusError>()
    })
}

/// HTTP client wrapper with automatic retries.
#[derive(Debug, Clone)]
pub struct RetryClient {
    client: Client,
    policy: Policy,
    checker: ResponseChecker,
}

impl RetryClient {
    /// Create a new retry client with default reqwest client.
    pub fn new(policy: Policy) -> Self {
        Self::with_client(Client::new(), policy)
    }

    /// Create with a custom reqwest client.
    pub fn with_client(client: Client, policy: Policy) -> Self {
        Self {
            client,
            policy,
            checker: is_retryable_status,
        }
    }

    /// Create with the `http_status` preset.
    pub fn for_api() -> Self {
        Self::new(Policy::http_status())
    }

    /// Replace the status checker.
    #[must_use]
    pub fn with_checker(mut self, checker: ResponseChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Get a reference to the underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a reference to the retry policy.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Execute a GET request with retries.
    pub async fn get(&self, url: &str) -> anyhow::Result<Response> {
        self.execute(Method::GET, url, None::<&()>).await
    }

    /// Execute a POST request with retries.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> anyhow::Result<Response> {
        self.execute(Method::POST, url, Some(body)).await
    }

    /// Execute a PUT request with retries.
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> anyhow::Result<Response> {
        self.execute(Method::PUT, url, Some(body)).await
    }

    /// Execute a DELETE request with retries.
    pub async fn delete(&self, url: &str) -> anyhow::Result<Response> {
        self.execute(Method::DELETE, url, None::<&()>).await
    }

    /// Execute a PATCH request with retries.
    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> anyhow::Result<Response> {
        self.execute(Method::PATCH, url, Some(body)).await
    }

    /// Execute a request with retries, sending `body` as JSON.
    ///
    /// Responses the checker does not flag are returned as they are, whatever
    /// their status. Once the session ends on a flagged status the error is a
    /// [`StatusError`] carrying the last response's status and body.
    pub async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> anyhow::Result<Response> {
        Retry::new(self.policy)
            .run_with_condition(is_retryable_error, || {
                self.send_once(method.clone(), url, body)
            })
            .await
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> anyhow::Result<Response> {
        debug!(method = %method, url, "Making HTTP request");

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        check_response(response, self.checker).await
    }
}

/// Turn a flagged response into a [`StatusError`].
async fn check_response(
    response: Response,
    checker: ResponseChecker,
) -> anyhow::Result<Response> {
    if !checker(response.status()) {
        return Ok(response);
    }
    Err(StatusError::from_response(response).await.into())
}

/// Builder for creating a retry client.
#[derive(Debug)]
pub struct RetryClientBuilder {
    client: Option<Client>,
    policy: Policy,
    checker: ResponseChecker,
    timeout: Option<Duration>,
}

impl Default for RetryClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            policy: Policy::http_status(),
            checker: is_retryable_status,
            timeout: None,
        }
    }
}

impl RetryClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the underlying HTTP client.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the whole retry policy.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the status checker.
    pub fn checker(mut self, checker: ResponseChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Set max attempts.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.policy = self.policy.max_attempts(n);
        self
    }

    /// Set initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy = self.policy.initial_delay(delay);
        self
    }

    /// Set max delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy = self.policy.max_delay(delay);
        self
    }

    /// Set the per-request timeout. Ignored when a client is supplied.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the retry client.
    pub fn build(self) -> Result<RetryClient, reqwest::Error> {
        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder = Client::builder();
                if let Some(timeout) = self.timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build()?
            }
        };

        Ok(RetryClient::with_client(client, self.policy).with_checker(self.checker))
    }
}
