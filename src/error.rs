//! Error types for the CircleCI provider.

use std::fmt;

use thiserror::Error;

use crate::context::CancelReason;

/// Errors surfaced by provider operations.
///
/// These cross the plugin boundary as error diagnostics.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested remote object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The supplied configuration or state is invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider is not configured, or its configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// State or configuration could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The plugin server failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Binding or reading from the listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote object already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Authentication or authorization was rejected by CircleCI.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// CircleCI kept rate limiting after all retries.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// CircleCI could not be reached or failed server-side.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The operation deadline passed.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The operation was cancelled, usually because the provider is stopping.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The operation is not supported for this type.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// CircleCI rejected the request.
    #[error("API error: {0}")]
    Api(String),
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::Cancelled(msg)
            | Self::Unimplemented(msg)
            | Self::Api(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Transport(err) => err.to_string(),
            Self::Io(err) => err.to_string(),
        }
    }

    /// Whether this error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors from the HTTP transport stack.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying HTTP client failed (DNS, connect, TLS, I/O).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The call context finished before the call completed.
    #[error(transparent)]
    Cancelled(CancelReason),
}

/// Errors from a single CircleCI API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The call context finished first.
    #[error("request aborted: {0}")]
    Cancelled(CancelReason),

    /// CircleCI answered with a non-success status.
    #[error("{method} {path} returned {status}: {message}")]
    Status {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("failed to decode response from {path}: {source}")]
    Decode {
        /// Request path.
        path: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// An endpoint URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The API token cannot be sent as a header value.
    #[error("API token contains characters not allowed in an HTTP header")]
    InvalidToken,
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Http(err) => Self::Transport(err),
            TransportError::Cancelled(reason) => Self::Cancelled(reason),
        }
    }
}

impl ApiError {
    /// HTTP status of the response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether CircleCI reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Classify this error as a [`ProviderError`], prefixed with `action`.
    pub fn into_provider_error(self, action: impl fmt::Display) -> ProviderError {
        let message = format!("{action}: {self}");
        match self {
            Self::Status { status, .. } => match status {
                401 | 403 => ProviderError::PermissionDenied(message),
                404 => ProviderError::NotFound(message),
                409 => ProviderError::AlreadyExists(message),
                429 => ProviderError::ResourceExhausted(message),
                500..=599 => ProviderError::Unavailable(message),
                _ => ProviderError::Api(message),
            },
            Self::Transport(_) => ProviderError::Unavailable(message),
            Self::Cancelled(CancelReason::Cancelled) => ProviderError::Cancelled(message),
            Self::Cancelled(CancelReason::DeadlineExceeded) => {
                ProviderError::DeadlineExceeded(message)
            }
            Self::InvalidToken => ProviderError::Configuration(message),
            Self::Decode { .. } | Self::Encode(_) | Self::Url(_) => ProviderError::Api(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16) -> ApiError {
        ApiError::Status {
            method: "GET".to_string(),
            path: "/api/v2/context/abc".to_string(),
            status,
            message: "Context not found".to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("context abc".to_string());
        assert_eq!(format!("{}", err), "Resource not found: context abc");

        let err = ProviderError::UnknownResource("circleci_bogus".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: circleci_bogus");

        let err = status_error(404);
        assert_eq!(
            err.to_string(),
            "GET /api/v2/context/abc returned 404: Context not found"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error(401).into_provider_error("reading"),
            ProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            status_error(403).into_provider_error("reading"),
            ProviderError::PermissionDenied(_)
        ));
        assert!(status_error(404).into_provider_error("reading").is_not_found());
        assert!(matches!(
            status_error(409).into_provider_error("creating"),
            ProviderError::AlreadyExists(_)
        ));
        assert!(matches!(
            status_error(429).into_provider_error("creating"),
            ProviderError::ResourceExhausted(_)
        ));
        assert!(matches!(
            status_error(503).into_provider_error("creating"),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(400).into_provider_error("creating"),
            ProviderError::Api(_)
        ));
    }

    #[test]
    fn test_action_prefix() {
        let err = status_error(404).into_provider_error("reading context abc");
        assert_eq!(
            err.message(),
            "reading context abc: GET /api/v2/context/abc returned 404: Context not found"
        );
    }

    #[test]
    fn test_cancellation_classification() {
        let err = ApiError::from(TransportError::Cancelled(CancelReason::Cancelled));
        assert!(matches!(
            err.into_provider_error("deleting"),
            ProviderError::Cancelled(_)
        ));

        let err = ApiError::from(TransportError::Cancelled(CancelReason::DeadlineExceeded));
        assert!(err.status().is_none());
        assert!(matches!(
            err.into_provider_error("deleting"),
            ProviderError::DeadlineExceeded(_)
        ));
    }
}
