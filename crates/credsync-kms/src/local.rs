//! In-process AES-256-GCM key.
//!
//! Ciphertext layout: `nonce(12) || ciphertext || tag(16)`. Signing uses
//! HMAC-SHA256 under a subkey derived from the master key, so a signature
//! can never be confused with an encryption key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{KmsError, KmsResult};
use crate::Kms;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const SIGNING_LABEL: &[u8] = b"credsync/kms/sign/v1";

/// Key id reported by the development key.
pub const DEV_KEY_ID: &str = "local-dev";

type HmacSha256 = Hmac<Sha256>;

pub struct LocalKms {
    key_id: String,
    cipher: Aes256Gcm,
    signing_key: Secret<Vec<u8>>,
}

impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKms")
            .field("key_id", &self.key_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl LocalKms {
    pub fn from_key_bytes(key_id: impl Into<String>, key: &[u8]) -> KmsResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(KmsError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }

        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| KmsError::InvalidKey(e.to_string()))?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| KmsError::InvalidKey(e.to_string()))?;
        mac.update(SIGNING_LABEL);
        let signing_key = mac.finalize().into_bytes().to_vec();

        Ok(Self {
            key_id: key_id.into(),
            cipher,
            signing_key: Secret::new(signing_key),
        })
    }

    /// Key given as standard base64 (`KMS_MASTER_KEY`).
    pub fn from_base64(key_id: impl Into<String>, encoded: &str) -> KmsResult<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| KmsError::InvalidKey(format!("base64 decode failed: {e}")))?;
        Self::from_key_bytes(key_id, &key)
    }

    /// Development key given as a raw 32-character string (`KMS_DEV_KEY`).
    pub fn dev(passphrase: &str) -> KmsResult<Self> {
        Self::from_key_bytes(DEV_KEY_ID, passphrase.as_bytes())
    }

    fn mac(&self) -> KmsResult<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(self.signing_key.expose_secret())
            .map_err(|e| KmsError::InvalidKey(e.to_string()))
    }
}

#[async_trait]
impl Kms for LocalKms {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn encrypt(&self, plaintext: &[u8]) -> KmsResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| KmsError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    async fn decrypt(&self, sealed: &[u8]) -> KmsResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(KmsError::Decryption("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| KmsError::Decryption(e.to_string()))
    }

    async fn sign(&self, data: &[u8]) -> KmsResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    async fn verify(&self, data: &[u8], signature: &[u8]) -> KmsResult<bool> {
        let expected = self.sign(data).await?;
        Ok(expected.ct_eq(signature).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kms() -> LocalKms {
        LocalKms::from_key_bytes("test", &[0x42u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn test_encrypt_decrypt() {
        let kms = kms();
        let sealed = kms.encrypt(b"{\"credential_id\":\"C1\"}").await.unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 22 + TAG_SIZE);
        assert_eq!(kms.decrypt(&sealed).await.unwrap(), b"{\"credential_id\":\"C1\"}");
    }

    #[tokio::test]
    async fn test_nonce_is_fresh_per_call() {
        let kms = kms();
        let a = kms.encrypt(b"same").await.unwrap();
        let b = kms.encrypt(b"same").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails() {
        let kms = kms();
        let mut sealed = kms.encrypt(b"payload").await.unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(kms.decrypt(&sealed).await, Err(KmsError::Decryption(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let sealed = kms().encrypt(b"payload").await.unwrap();
        let other = LocalKms::from_key_bytes("other", &[0x24u8; 32]).unwrap();
        assert!(other.decrypt(&sealed).await.is_err());
    }

    #[tokio::test]
    async fn test_short_input_fails() {
        assert!(kms().decrypt(&[0u8; 8]).await.is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let err = LocalKms::from_key_bytes("bad", &[1u8; 16]).unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn test_from_base64() {
        let encoded = BASE64.encode([9u8; 32]);
        assert!(LocalKms::from_base64("b64", &encoded).is_ok());
        assert!(LocalKms::from_base64("b64", "!!!").is_err());
    }

    #[test]
    fn test_dev_key_requires_32_chars() {
        assert!(LocalKms::dev("0123456789abcdef0123456789abcdef").is_ok());
        assert!(LocalKms::dev("short").is_err());
    }

    #[tokio::test]
    async fn test_sign_and_verify() {
        let kms = kms();
        let sig = kms.sign(b"data").await.unwrap();
        assert_eq!(sig.len(), 32);
        assert!(kms.verify(b"data", &sig).await.unwrap());
        assert!(!kms.verify(b"other", &sig).await.unwrap());
        assert!(!kms.verify(b"data", &sig[..16]).await.unwrap());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", kms());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("66"));
    }
}
