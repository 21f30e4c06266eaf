//! Read models for the issuer and learner collaborators, plus per-issuer
//! sync state.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IssuerId, LearnerId};

/// An issuer as the sync pipeline sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerProfile {
    pub id: IssuerId,
    pub name: String,
    /// Connector id this issuer's credentials come from (e.g. `nsdc`).
    pub provider: String,
    /// The issuer's identifier inside the provider's registry.
    pub registry_id: Option<String>,
    pub accept_external: bool,
    /// Overrides the connector's default JWKS location.
    pub jwks_url: Option<String>,
}

impl IssuerProfile {
    /// Registry id if this issuer can take part in sync at all.
    #[must_use]
    pub fn sync_registry_id(&self) -> Option<&str> {
        if !self.accept_external {
            return None;
        }
        self.registry_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Durable sync bookkeeping for one issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub issuer_id: IssuerId,
    pub provider: String,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Whether the issuer has gone longer than `threshold` without a sync.
    /// Never-synced issuers are always stale.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.last_successful_sync_at {
            Some(at) => now - at > threshold,
            None => true,
        }
    }
}

/// A learner surfaced by a DOB-range lookup for fuzzy matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerCandidate {
    pub id: LearnerId,
    pub name: String,
    pub dob: Option<NaiveDate>,
}

/// Digits compared when matching phone numbers.
pub const PHONE_SUFFIX_LEN: usize = 10;

/// Last ten digits of a phone number, ignoring formatting and country code.
///
/// Returns `None` for inputs with fewer than ten digits.
#[must_use]
pub fn phone_suffix(phone: &str) -> Option<String> {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < PHONE_SUFFIX_LEN {
        return None;
    }
    Some(digits[digits.len() - PHONE_SUFFIX_LEN..].iter().collect())
}
