//! Credential data model shared by connectors, the matcher and the stores.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{CredentialRecordId, IssuerId, LearnerId};

/// How a provider signed a credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureType {
    #[default]
    Jws,
    Hmac,
    Pdf,
    Dsc,
    None,
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Jws => "JWS",
            Self::Hmac => "HMAC",
            Self::Pdf => "PDF",
            Self::Dsc => "DSC",
            Self::None => "NONE",
        };
        f.write_str(s)
    }
}

/// A credential exactly as a provider handed it over.
///
/// `signed_payload` is a compact JWS string for `Jws` credentials and the
/// structured credential object otherwise. `raw_data` is the untouched item
/// from the provider response or webhook body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProviderCredential {
    pub id: String,
    pub signed_payload: serde_json::Value,
    #[serde(default)]
    pub signature_type: SignatureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_header: Option<String>,
    pub raw_data: serde_json::Value,
}

impl RawProviderCredential {
    /// The compact JWS string, if the signed payload is one.
    #[must_use]
    pub fn compact_jws(&self) -> Option<&str> {
        self.signed_payload.as_str()
    }
}

/// Provider-agnostic form of a credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCredential {
    pub provider_credential_id: String,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_dob: Option<NaiveDate>,
    pub certificate_title: String,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Which trust path produced a verification outcome.
///
/// `PdfSignatureMeta` and `DscSignatureMeta` mean the pipeline trusted an
/// upstream `signature_meta.valid` flag without checking the signature
/// itself. They are weaker than `Jws` and `Hmac` and are reported as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Jws,
    Hmac,
    PdfSignatureMeta,
    DscSignatureMeta,
    None,
}

impl VerificationMethod {
    /// Whether the pipeline checked the signature cryptographically.
    #[must_use]
    pub fn is_cryptographic(&self) -> bool {
        matches!(self, Self::Jws | Self::Hmac)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jws => "jws",
            Self::Hmac => "hmac",
            Self::PdfSignatureMeta => "pdf_signature_meta",
            Self::DscSignatureMeta => "dsc_signature_meta",
            Self::None => "none",
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jws" => Ok(Self::Jws),
            "hmac" => Ok(Self::Hmac),
            "pdf_signature_meta" => Ok(Self::PdfSignatureMeta),
            "dsc_signature_meta" => Ok(Self::DscSignatureMeta),
            "none" => Ok(Self::None),
            other => Err(format!("unknown verification method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub method: VerificationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The check could not run (key set or network unavailable). Another
    /// attempt may succeed; the credential itself was not judged.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transient: bool,
}

impl VerificationResult {
    #[must_use]
    pub fn verified(method: VerificationMethod, key_id: Option<String>) -> Self {
        Self {
            verified: true,
            method,
            key_id,
            error: None,
            transient: false,
        }
    }

    #[must_use]
    pub fn rejected(method: VerificationMethod, error: impl Into<String>) -> Self {
        Self {
            verified: false,
            method,
            key_id: None,
            error: Some(error.into()),
            transient: false,
        }
    }

    /// Not verified because the check itself failed to run.
    #[must_use]
    pub fn unavailable(method: VerificationMethod, error: impl Into<String>) -> Self {
        Self {
            transient: true,
            ..Self::rejected(method, error)
        }
    }

    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

/// Which cascade step resolved the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Email,
    OtherEmail,
    Phone,
    Fuzzy,
    None,
}

impl MatchType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::OtherEmail => "other_email",
            Self::Phone => "phone",
            Self::Fuzzy => "fuzzy",
            Self::None => "none",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "other_email" => Ok(Self::OtherEmail),
            "phone" => Ok(Self::Phone),
            "fuzzy" => Ok(Self::Fuzzy),
            "none" => Ok(Self::None),
            other => Err(format!("unknown match type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    /// The credential value that matched (email, phone digits, or name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_value: Option<String>,
    /// Learners examined by the fuzzy step.
    pub candidates_considered: usize,
    /// Best name similarity seen, whether or not it cleared the threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub learner_id: Option<LearnerId>,
    pub confidence: f64,
    pub match_type: MatchType,
    #[serde(default)]
    pub details: MatchDetails,
}

impl MatchResult {
    #[must_use]
    pub fn matched(
        learner_id: LearnerId,
        confidence: f64,
        match_type: MatchType,
        details: MatchDetails,
    ) -> Self {
        Self {
            learner_id: Some(learner_id),
            confidence,
            match_type,
            details,
        }
    }

    #[must_use]
    pub fn no_match(details: MatchDetails) -> Self {
        Self {
            learner_id: None,
            confidence: 0.0,
            match_type: MatchType::None,
            details,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Pending,
    Verified,
    Rejected,
}

impl CredentialStatus {
    /// Status for a match of the given confidence.
    #[must_use]
    pub fn for_confidence(confidence: f64, threshold: f64) -> Self {
        if confidence >= threshold {
            Self::Verified
        } else {
            Self::Pending
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown credential status: {other}")),
        }
    }
}

/// Everything the processor writes for one credential.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExternalCredential {
    pub issuer_id: IssuerId,
    pub provider: String,
    pub provider_credential_id: String,
    pub canonical: CanonicalCredential,
    pub encrypted_raw: Vec<u8>,
    pub signature_verified: bool,
    pub verification_method: VerificationMethod,
    pub match_confidence: f64,
    pub match_type: MatchType,
    pub learner_id: Option<LearnerId>,
    pub status: CredentialStatus,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalCredentialRecord {
    pub id: CredentialRecordId,
    pub issuer_id: IssuerId,
    pub provider: String,
    pub provider_credential_id: String,
    pub canonical: CanonicalCredential,
    #[serde(skip_serializing)]
    pub encrypted_raw: Vec<u8>,
    pub signature_verified: bool,
    pub verification_method: VerificationMethod,
    pub match_confidence: f64,
    pub match_type: MatchType,
    pub learner_id: Option<LearnerId>,
    pub status: CredentialStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl ExternalCredentialRecord {
    #[must_use]
    pub fn from_new(new: NewExternalCredential, processed_at: DateTime<Utc>) -> Self {
        Self {
            id: CredentialRecordId::new(),
            issuer_id: new.issuer_id,
            provider: new.provider,
            provider_credential_id: new.provider_credential_id,
            canonical: new.canonical,
            encrypted_raw: new.encrypted_raw,
            signature_verified: new.signature_verified,
            verification_method: new.verification_method,
            match_confidence: new.match_confidence,
            match_type: new.match_type,
            learner_id: new.learner_id,
            status: new.status,
            received_at: new.received_at,
            processed_at,
        }
    }
}
