//! Compact JWS verification against a provider JWKS.
//!
//! The signing algorithm is taken from the selected JWK. A header that
//! names a different algorithm is rejected rather than trusted.

use credsync_core::{VerificationMethod, VerificationResult};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tracing::{debug, warn};

use crate::jwks::{Jwk, JwksCache};

/// Verify `token` with the key its header `kid` selects from `jwks_url`.
pub async fn verify_compact_jws(cache: &JwksCache, jwks_url: &str, token: &str) -> VerificationResult {
    let header = match decode_header(token) {
        Ok(h) => h,
        Err(e) => {
            return VerificationResult::rejected(
                VerificationMethod::Jws,
                format!("Malformed JWS header: {e}"),
            )
        }
    };

    let Some(kid) = header.kid else {
        return VerificationResult::rejected(VerificationMethod::Jws, "JWS header has no kid");
    };

    let jwk = match cache.find_key(jwks_url, &kid).await {
        Ok(Some(jwk)) => jwk,
        Ok(None) => {
            return VerificationResult::rejected(
                VerificationMethod::Jws,
                format!("Key {kid} not found in JWKS"),
            )
            .with_key_id(kid)
        }
        Err(e) => {
            warn!(jwks_url, kid = %kid, error = %e, transient = e.is_transient(), "JWKS lookup failed");
            let result = if e.is_transient() {
                VerificationResult::unavailable(VerificationMethod::Jws, e.to_string())
            } else {
                VerificationResult::rejected(VerificationMethod::Jws, e.to_string())
            };
            return result.with_key_id(kid);
        }
    };

    let (key, algorithm) = match decoding_key(&jwk) {
        Ok(pair) => pair,
        Err(message) => {
            return VerificationResult::rejected(VerificationMethod::Jws, message).with_key_id(kid)
        }
    };

    if header.alg != algorithm {
        return VerificationResult::rejected(
            VerificationMethod::Jws,
            format!("JWS alg {:?} does not match key alg {:?}", header.alg, algorithm),
        )
        .with_key_id(kid);
    }

    // Credential expiry is business data, not a reason to doubt provenance.
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match decode::<serde_json::Value>(token, &key, &validation) {
        Ok(_) => {
            debug!(kid = %kid, "JWS signature verified");
            VerificationResult::verified(VerificationMethod::Jws, Some(kid))
        }
        Err(e) => VerificationResult::rejected(
            VerificationMethod::Jws,
            format!("JWS signature invalid: {e}"),
        )
        .with_key_id(kid),
    }
}

/// Build a decoding key and its algorithm from a JWK.
fn decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), String> {
    match jwk.kty.as_str() {
        "RSA" => {
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                return Err("RSA key is missing n or e".into());
            };
            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| format!("Invalid RSA key: {e}"))?;
            let alg = match jwk.alg.as_deref() {
                None | Some("RS256") => Algorithm::RS256,
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                Some("PS256") => Algorithm::PS256,
                Some("PS384") => Algorithm::PS384,
                Some("PS512") => Algorithm::PS512,
                Some(other) => return Err(format!("Unsupported RSA alg {other}")),
            };
            Ok((key, alg))
        }
        "EC" => {
            let (Some(x), Some(y)) = (jwk.x.as_deref(), jwk.y.as_deref()) else {
                return Err("EC key is missing x or y".into());
            };
            let key = DecodingKey::from_ec_components(x, y)
                .map_err(|e| format!("Invalid EC key: {e}"))?;
            let alg = match (jwk.alg.as_deref(), jwk.crv.as_deref()) {
                (Some("ES384"), _) | (None, Some("P-384")) => Algorithm::ES384,
                (Some("ES256") | None, _) => Algorithm::ES256,
                (Some(other), _) => return Err(format!("Unsupported EC alg {other}")),
            };
            Ok((key, alg))
        }
        "OKP" => {
            let Some(x) = jwk.x.as_deref() else {
                return Err("OKP key is missing x".into());
            };
            let key =
                DecodingKey::from_ed_components(x).map_err(|e| format!("Invalid OKP key: {e}"))?;
            Ok((key, Algorithm::EdDSA))
        }
        other => Err(format!("Unsupported key type {other}")),
    }
}
