//! Storage error shared by every store backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or failed mid-operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// A uniqueness or ordering rule was violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Worth retrying later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
