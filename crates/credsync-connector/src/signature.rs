//! HMAC-SHA256 webhook signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `payload` under `secret`.
#[must_use]
pub fn compute_signature(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature header against the raw body.
///
/// Accepts an optional `sha256=` prefix and either hex case. Returns
/// `false` when no secret is configured.
#[must_use]
pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: Option<&str>) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        warn!("Webhook signature check requested but no secret is configured");
        return false;
    };

    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };

    let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}
