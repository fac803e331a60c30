//! HTTP transports used by the CircleCI API client.
//!
//! [`ReqwestTransport`] sends requests over the network. [`RetryTransport`]
//! decorates any [`HttpTransport`] and retries responses with status
//! `429 Too Many Requests` using the backoff of a shared [`RetryPolicy`].
//! All other outcomes, including transport errors, pass through unchanged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::context::CallContext;
use crate::error::TransportError;
use crate::retry::RetryPolicy;

/// Default per-request timeout of the network transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// An outbound HTTP call.
///
/// The body is kept as bytes so every attempt sends an identical request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    /// A request without headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Attach a body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    fn to_reqwest(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        match &self.body {
            Some(body) => builder.body(body.clone()),
            None => builder,
        }
    }
}

/// Something that can turn an [`ApiRequest`] into a response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request. Implementations must honor `ctx`.
    async fn send(
        &self,
        request: &ApiRequest,
        ctx: &CallContext,
    ) -> Result<reqwest::Response, TransportError>;
}

/// Network transport backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the default timeout and a provider user agent.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .user_agent(concat!("circleci-provider/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        ctx: &CallContext,
    ) -> Result<reqwest::Response, TransportError> {
        if let Some(reason) = ctx.err() {
            return Err(TransportError::Cancelled(reason));
        }
        let pending = request.to_reqwest(&self.client).send();
        tokio::select! {
            biased;
            reason = ctx.done() => Err(TransportError::Cancelled(reason)),
            result = pending => Ok(result?),
        }
    }
}

/// Decorator that retries rate-limited responses.
pub struct RetryTransport<T> {
    inner: T,
    policy: Arc<RetryPolicy>,
}

impl<T: HttpTransport> RetryTransport<T> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: T, policy: Arc<RetryPolicy>) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for RetryTransport<T> {
    async fn send(
        &self,
        request: &ApiRequest,
        ctx: &CallContext,
    ) -> Result<reqwest::Response, TransportError> {
        if !self.policy.enabled {
            return self.inner.send(request, ctx).await;
        }

        let mut attempt: u32 = 0;
        loop {
            let response = self.inner.send(request, ctx).await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS
                || attempt >= self.policy.max_retries
            {
                return Ok(response);
            }

            let delay = self.policy.backoff(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                method = %request.method,
                url = %request.url,
                "rate limited, retrying after backoff"
            );

            // The body must be released before the next attempt goes out.
            let wait = async move {
                let _ = response.bytes().await;
                tokio::time::sleep(delay).await;
            };
            tokio::select! {
                biased;
                reason = ctx.done() => return Err(TransportError::Cancelled(reason)),
                _ = wait => {}
            }
            attempt += 1;
        }
    }
}
