//! Provider connectors for external credential sync.
//!
//! Each provider implements [`CredentialConnector`]: pull credentials,
//! subscribe to pushes, verify provenance, and normalize into a
//! [`CanonicalCredential`](credsync_core::CanonicalCredential). Connectors
//! are built once at startup and looked up through a [`ConnectorRegistry`].
//!
//! ```text
//!  webhook / poller ──► ConnectorRegistry ──► NsdcConnector ──► OAuthTokenCache ──► provider API
//!                                        │                 └──► JwksCache ──► JWKS / snapshot
//!                                        └──► DigiLockerConnector (stub)
//! ```
//!
//! # Verification strength
//!
//! JWS and HMAC results are cryptographic checks. PDF and DSC credentials
//! are accepted when the provider flagged `signature_meta.valid`; the
//! resulting `*_signature_meta` methods record that weaker trust.

pub mod digilocker;
pub mod error;
pub mod fields;
pub mod jwks;
pub mod jws;
pub mod nsdc;
pub mod registry;
pub mod signature;
pub mod token;
pub mod traits;

pub use digilocker::{DigiLockerConnector, DIGILOCKER_PROVIDER};
pub use error::{ConnectorError, ConnectorResult};
pub use jwks::{Jwk, JwkSet, JwksCache, DEFAULT_JWKS_TTL};
pub use nsdc::{NsdcConfig, NsdcConnector, NSDC_PROVIDER};
pub use registry::ConnectorRegistry;
pub use signature::{compute_signature, verify_webhook_signature};
pub use token::OAuthTokenCache;
pub use traits::{CredentialConnector, FetchOptions, FetchPage, WebhookNotice, WebhookSubscription};

pub use async_trait::async_trait;
