//! HTTP error type for the service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use credsync_connector::ConnectorError;
use credsync_core::{DlqEntryId, IssuerId, StoreError};
use credsync_sync::{DlqError, PollError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("External sync disabled")]
    SyncDisabled,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Issuer not found: {0}")]
    IssuerNotFound(IssuerId),

    #[error("Issuer {0} cannot be synced: it does not accept external credentials, has no registry id, or its provider is not registered")]
    NotSyncable(IssuerId),

    #[error("DLQ entry not found: {0}")]
    DlqEntryNotFound(DlqEntryId),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Disabled => Self::SyncDisabled,
            PollError::IssuerNotFound(id) => Self::IssuerNotFound(id),
            PollError::NotSyncable(id) => Self::NotSyncable(id),
            PollError::UnknownProvider(provider) => Self::UnknownProvider(provider),
            PollError::Connector(e) => Self::Connector(e),
            PollError::Store(e) => Self::Store(e),
        }
    }
}

impl From<DlqError> for ApiError {
    fn from(err: DlqError) -> Self {
        match err {
            DlqError::NotFound(id) => Self::DlqEntryNotFound(id),
            DlqError::Store(e) => Self::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            // Providers key on this exact string.
            ApiError::SyncDisabled => (StatusCode::SERVICE_UNAVAILABLE, "External sync disabled"),
            ApiError::UnknownProvider(_) => (StatusCode::NOT_FOUND, "unknown_provider"),
            ApiError::IssuerNotFound(_) => (StatusCode::NOT_FOUND, "issuer_not_found"),
            ApiError::NotSyncable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "issuer_not_syncable"),
            ApiError::DlqEntryNotFound(_) => (StatusCode::NOT_FOUND, "dlq_entry_not_found"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::Connector(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Storage error while handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
        };

        let message = match &self {
            ApiError::Store(_) => "Database error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::SyncDisabled, StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::UnknownProvider("acme".into()), StatusCode::NOT_FOUND),
            (ApiError::IssuerNotFound(IssuerId::new()), StatusCode::NOT_FOUND),
            (ApiError::NotSyncable(IssuerId::new()), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ApiError::Connector(ConnectorError::Timeout), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_poll_error_mapping() {
        assert!(matches!(ApiError::from(PollError::Disabled), ApiError::SyncDisabled));
        let id = IssuerId::new();
        assert!(matches!(
            ApiError::from(PollError::IssuerNotFound(id)),
            ApiError::IssuerNotFound(found) if found == id
        ));
    }

    #[test]
    fn test_store_error_hides_detail() {
        let err = ApiError::Store(StoreError::Corrupt("row 7".into()));
        assert_eq!(err.to_string(), "Storage error: corrupt stored value: row 7");
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
