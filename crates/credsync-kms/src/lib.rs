//! Key management for credential payloads.
//!
//! The processor encrypts every raw provider payload before it is written
//! to the credential store. [`Kms`] is the seam: [`LocalKms`] keeps an
//! AES-256-GCM key in process memory and is what development and the test
//! suite use; a hosted KMS slots in behind the same trait.
//!
//! ```
//! use credsync_kms::{Kms, LocalKms};
//!
//! let kms = LocalKms::from_key_bytes("local", &[7u8; 32]).unwrap();
//! assert_eq!(kms.key_id(), "local");
//! ```

mod error;
mod local;

pub use error::{KmsError, KmsResult};
pub use local::{LocalKms, DEV_KEY_ID};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

#[async_trait]
pub trait Kms: Send + Sync {
    /// Identifier of the key material, stored alongside ciphertexts.
    fn key_id(&self) -> &str;

    async fn encrypt(&self, plaintext: &[u8]) -> KmsResult<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8]) -> KmsResult<Vec<u8>>;

    async fn sign(&self, data: &[u8]) -> KmsResult<Vec<u8>>;

    async fn verify(&self, data: &[u8], signature: &[u8]) -> KmsResult<bool>;
}

/// Serialize `value` as JSON and encrypt it.
pub async fn encrypt_json<T: Serialize + ?Sized>(kms: &dyn Kms, value: &T) -> KmsResult<Vec<u8>> {
    let bytes = serde_json::to_vec(value).map_err(|e| KmsError::Serialization(e.to_string()))?;
    kms.encrypt(&bytes).await
}

/// Decrypt a ciphertext produced by [`encrypt_json`].
pub async fn decrypt_json<T: DeserializeOwned>(kms: &dyn Kms, ciphertext: &[u8]) -> KmsResult<T> {
    let bytes = kms.decrypt(ciphertext).await?;
    serde_json::from_slice(&bytes).map_err(|e| KmsError::Serialization(e.to_string()))
}
