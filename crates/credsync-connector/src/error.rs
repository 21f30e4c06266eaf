//! Connector error types, classified for queue retry decisions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Could not reach the provider at all.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("request to provider timed out")]
    Timeout,

    /// Provider answered with a 5xx or 429.
    #[error("provider unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The provider rejected our client credentials or access token.
    #[error("provider authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Response did not have the documented shape.
    #[error("invalid provider response: {message}")]
    InvalidResponse { message: String },

    #[error("invalid connector configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("{operation} is not supported by provider {provider}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },

    /// No key set could be obtained from network or snapshot.
    #[error("JWKS unavailable for {url}: {message}")]
    JwksUnavailable { url: String, message: String },
}

impl ConnectorError {
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Map an HTTP status that is not 2xx.
    pub fn from_status(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        let message = body.into();
        match status.as_u16() {
            401 | 403 => Self::AuthenticationFailed { message },
            429 | 500..=599 => Self::Unavailable {
                status: status.as_u16(),
                message,
            },
            _ => Self::InvalidResponse {
                message: format!("HTTP {status}: {message}"),
            },
        }
    }

    /// Worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Timeout
                | Self::Unavailable { .. }
                | Self::AuthenticationFailed { .. }
                | Self::JwksUnavailable { .. }
        )
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::from_status(status, err.to_string())
        } else {
            Self::ConnectionFailed {
                message: err.to_string(),
                source: Some(Box::new(err)),
            }
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;
