//! Error types returned by the Autotask client.
use std::fmt;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Convenience type alias for results returned by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// HTTP statuses which indicate a transient failure worth retrying.
const RETRYABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Errors that can occur when talking to the Autotask API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The client was configured with missing or invalid credentials.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The request could not be built, usually because a header value was invalid.
    #[error("failed to build request: {0}")]
    Request(#[source] reqwest::Error),

    /// A transport-level failure occurred while sending a request or reading a response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Autotask responded with a non-success status code.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// A request body could not be serialized to JSON.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// A response body was not the JSON we expected.
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// A URL could not be parsed or joined against the regional base URL.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A filter expression could not be parsed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A single-entity lookup returned no item.
    #[error("{entity} with id {id} not found")]
    NotFound {
        /// The collection which was queried.
        entity: &'static str,
        /// The requested id.
        id: i64,
    },

    /// The local rate limiter refused to hand out a token.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The operation kept failing with retryable errors.
    #[error("max retries exceeded after {attempts} attempts: {source}")]
    RetryExhausted {
        /// The number of attempts made, including the first.
        attempts: u32,
        /// The error returned by the final attempt.
        source: Box<Error>,
    },

    /// The client was shut down while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// An entity operation failed.
    #[error("failed to {operation} {entity}: {source}")]
    Operation {
        /// The collection the operation targeted.
        entity: &'static str,
        /// The operation, e.g. `query` or `create`.
        operation: &'static str,
        /// The underlying error.
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with the entity collection and operation that produced it.
    pub fn context(self, entity: &'static str, operation: &'static str) -> Self {
        Self::Operation {
            entity,
            operation,
            source: Box::new(self),
        }
    }

    /// Whether retrying the failed operation might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Http(e) => e.is_retryable(),
            Self::Operation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the request was rejected before Autotask acted on it.
    ///
    /// Only these failures are retried for requests that are not idempotent.
    pub fn is_retryable_unprocessed(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::Network(e) => e.is_connect(),
            Self::Http(e) => e.status == StatusCode::TOO_MANY_REQUESTS,
            Self::Operation { source, .. } => source.is_retryable_unprocessed(),
            _ => false,
        }
    }

    /// Strip any [`Error::Operation`] and [`Error::RetryExhausted`] wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::Operation { source, .. } | Self::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// The HTTP status returned by Autotask, if this error came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self.root() {
            Self::Http(e) => Some(e.status),
            _ => None,
        }
    }
}

/// A non-success response from the Autotask API.
#[derive(Clone, Debug, Error)]
pub struct HttpError {
    /// The response status.
    pub status: StatusCode,
    /// The request method.
    pub method: Method,
    /// The request URL.
    pub url: String,
    /// The `Message` field of the error body, if any.
    pub message: String,
    /// The `errors` array of the error body, if any.
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    #[serde(rename = "Message", alias = "message")]
    message: String,
    errors: Vec<String>,
}

impl HttpError {
    /// Build an error from a response status and its (possibly empty or non-JSON) body.
    pub fn from_response(
        method: Method,
        url: impl Into<String>,
        status: StatusCode,
        body: &[u8],
    ) -> Self {
        let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
        let message = if parsed.message.is_empty() && parsed.errors.is_empty() {
            String::from_utf8_lossy(body).trim().to_string()
        } else {
            parsed.message
        };
        Self {
            status,
            method,
            url: url.into(),
            message,
            errors: parsed.errors,
        }
    }

    /// Whether the status is one of 429, 500, 502, 503 or 504.
    pub fn is_retryable(&self) -> bool {
        RETRYABLE_STATUSES.contains(&self.status)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned {}", self.method, self.url, self.status)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if !self.errors.is_empty() {
            write!(f, " ({})", self.errors.join("; "))?;
        }
        Ok(())
    }
}

/// Problems with the credentials a client was configured with.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// No API username was provided.
    #[error("username is required")]
    MissingUsername,
    /// No API secret was provided.
    #[error("secret is required")]
    MissingSecret,
    /// No API integration code was provided.
    #[error("integration code is required")]
    MissingIntegrationCode,
}
