//! Typed CircleCI REST client.
//!
//! [`ApiClient`] knows one API family (base URL plus credential) and turns
//! endpoint calls into [`ApiRequest`]s sent through a shared
//! [`HttpTransport`]. [`CircleciClient`] groups the families the provider
//! talks to; the endpoint functions live in the submodules.

mod core_api;
pub mod models;
mod runner;
mod webhook;

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, Span};
use url::Url;

use self::models::Page;
use crate::config::ProviderConfig;
use crate::context::CallContext;
use crate::error::ApiError;
use crate::transport::{ApiRequest, HttpTransport};

const CIRCLE_TOKEN: HeaderName = HeaderName::from_static("circle-token");

/// Client for a single API family.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    token: String,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client rooted at `base_url`, which must end in `/`.
    pub fn new(base_url: Url, token: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url,
            token: token.into(),
            transport,
        }
    }

    /// Build an endpoint URL. Segments may contain `/`, as project slugs do;
    /// every piece is percent-encoded on its own.
    pub fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty();
            for segment in segments {
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        let query: Vec<_> = query.iter().filter(|(_, v)| !v.is_empty()).collect();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Send a request and return the successful response.
    #[instrument(
        name = "circleci_request",
        skip_all,
        fields(http.method = %method, http.url = %url, http.status_code = tracing::field::Empty)
    )]
    async fn send(
        &self,
        ctx: &CallContext,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, ApiError> {
        let path = url.path().to_string();
        let mut request = ApiRequest::new(method.clone(), url);
        let token = HeaderValue::from_str(&self.token).map_err(|_| ApiError::InvalidToken)?;
        request.headers.insert(CIRCLE_TOKEN, token);
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(body) = body {
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            request = request.with_body(body);
        }

        let response = self.transport.send(&request, ctx).await?;
        let status = response.status();
        Span::current().record("http.status_code", status.as_u16());

        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = error_message(&text).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        });
        debug!(status = status.as_u16(), %message, "CircleCI returned an error");
        Err(ApiError::Status {
            method: method.to_string(),
            path,
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let path = response.url().path().to_string();
        let bytes = response.bytes().await.map_err(ApiError::Transport)?;
        serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode { path, source })
    }

    fn encode<B: Serialize>(body: &B) -> Result<Vec<u8>, ApiError> {
        serde_json::to_vec(body).map_err(ApiError::Encode)
    }

    /// `GET` and decode.
    pub async fn get<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = self.url(segments, query)?;
        let response = self.send(ctx, Method::GET, url, None).await?;
        Self::decode(response).await
    }

    /// `GET` a paginated listing, following `next_page_token` until it
    /// comes back empty.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut token = String::new();
        loop {
            let page: Page<T> = {
                let mut paged: Vec<(&str, &str)> = query.to_vec();
                paged.push(("page-token", token.as_str()));
                self.get(ctx, segments, &paged).await?
            };
            let next = page.next().map(str::to_string);
            items.extend(page.items);
            match next {
                Some(next) => token = next,
                None => return Ok(items),
            }
        }
    }

    /// Send `body` with `method` and decode the reply.
    pub async fn submit<B: Serialize, T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(segments, &[])?;
        let body = Self::encode(body)?;
        let response = self.send(ctx, method, url, Some(body)).await?;
        Self::decode(response).await
    }

    /// `DELETE`, discarding the reply body.
    pub async fn delete(&self, ctx: &CallContext, segments: &[&str]) -> Result<(), ApiError> {
        let url = self.url(segments, &[])?;
        let response = self.send(ctx, Method::DELETE, url, None).await?;
        let _ = response.bytes().await;
        Ok(())
    }
}

/// Pull `message` out of a CircleCI error body.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(trimmed.to_string())),
        Err(_) => Some(trimmed.to_string()),
    }
}

/// All API families used by the provider, sharing one transport stack.
#[derive(Debug, Clone)]
pub struct CircleciClient {
    /// `/api/v2`, including webhooks.
    pub core: ApiClient,
    /// `/api/v1.1`, used to follow projects.
    pub legacy: ApiClient,
    /// Runner API `/api/v3`.
    pub runner: ApiClient,
}

impl CircleciClient {
    /// Build the clients for `config` over `transport`.
    pub fn new(config: &ProviderConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, ApiError> {
        let token = config.api_token.clone();
        Ok(Self {
            core: ApiClient::new(config.core_url()?, token.clone(), Arc::clone(&transport)),
            legacy: ApiClient::new(config.legacy_url()?, token.clone(), Arc::clone(&transport)),
            runner: ApiClient::new(config.runner_url()?, token, transport),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::transport::{ReqwestTransport, RetryTransport};
    use std::time::Duration;
    use wiremock::MockServer;

    /// A client whose every family points at `server`, retrying quickly.
    pub fn client_for(server: &MockServer) -> CircleciClient {
        let config = ProviderConfig {
            api_token: "test-token".to_string(),
            hostname: Url::parse(&format!("{}/", server.uri())).unwrap(),
            runner_hostname: Url::parse(&format!("{}/", server.uri())).unwrap(),
            retry: RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
        };
        let transport = RetryTransport::new(
            ReqwestTransport::new().unwrap(),
            Arc::new(config.retry.clone()),
        );
        CircleciClient::new(&config, Arc::new(transport)).unwrap()
    }
}
