use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Wrong key, truncated input, or a tampered ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A hosted key service could not be reached or throttled the call.
    #[error("key service unavailable: {0}")]
    Unavailable(String),
}

impl KmsError {
    /// Worth retrying. Key and data errors fail the same way every time.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type KmsResult<T> = Result<T, KmsError>;
