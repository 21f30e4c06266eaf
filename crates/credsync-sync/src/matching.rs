//! Identity matching.
//!
//! Resolves a canonical credential to at most one learner through a fixed
//! cascade, stopping at the first step that yields a single learner:
//!
//! | Step        | Signal                              | Confidence |
//! |-------------|-------------------------------------|------------|
//! | email       | primary email, case-insensitive     | 1.0        |
//! | other_email | one learner lists it as alternate   | 0.95       |
//! | phone       | last 10 digits of the phone number  | 0.9        |
//! | fuzzy       | name similarity among DOB ±1 day    | similarity |

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use credsync_core::{
    phone_suffix, CanonicalCredential, LearnerDirectory, MatchDetails, MatchResult, MatchType,
    StoreResult,
};
use strsim::normalized_levenshtein;
use tracing::{debug, instrument};

pub const EMAIL_CONFIDENCE: f64 = 1.0;
pub const OTHER_EMAIL_CONFIDENCE: f64 = 0.95;
pub const PHONE_CONFIDENCE: f64 = 0.9;

/// Maximum learners examined by the fuzzy step.
pub const FUZZY_CANDIDATE_LIMIT: u32 = 100;

/// Days either side of the credential's DOB searched by the fuzzy step.
pub const DOB_WINDOW_DAYS: i64 = 1;

/// Lowercase, keep alphabetic characters and collapse whitespace.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphabetic() {
                c.to_lowercase().next().unwrap_or(c)
            } else if c.is_whitespace() {
                ' '
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `1 - levenshtein / max_len` on normalized names. Empty names score 0.
#[must_use]
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(&a, &b)
}

/// The matching cascade over a learner directory.
#[derive(Clone)]
pub struct MatchingEngine {
    learners: Arc<dyn LearnerDirectory>,
    threshold: f64,
}

impl MatchingEngine {
    pub fn new(learners: Arc<dyn LearnerDirectory>, threshold: f64) -> Self {
        Self {
            learners,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[instrument(skip(self, credential), fields(credential_id = %credential.provider_credential_id))]
    pub async fn match_credential(&self, credential: &CanonicalCredential) -> StoreResult<MatchResult> {
        let email = credential
            .recipient_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());

        if let Some(email) = email {
            if let Some(learner_id) = self.learners.find_by_email(email).await? {
                return Ok(MatchResult::matched(
                    learner_id,
                    EMAIL_CONFIDENCE,
                    MatchType::Email,
                    matched_on(email),
                ));
            }

            let alternates = self.learners.find_by_alternate_email(email).await?;
            match alternates.as_slice() {
                [learner_id] => {
                    return Ok(MatchResult::matched(
                        *learner_id,
                        OTHER_EMAIL_CONFIDENCE,
                        MatchType::OtherEmail,
                        matched_on(email),
                    ));
                }
                [] => {}
                _ => debug!(count = alternates.len(), "Alternate email is ambiguous, skipping"),
            }
        }

        if let Some(digits) = credential.recipient_phone.as_deref().and_then(phone_suffix) {
            let by_phone = self.learners.find_by_phone_suffix(&digits).await?;
            match by_phone.as_slice() {
                [learner_id] => {
                    return Ok(MatchResult::matched(
                        *learner_id,
                        PHONE_CONFIDENCE,
                        MatchType::Phone,
                        matched_on(&digits),
                    ));
                }
                [] => {}
                _ => debug!(count = by_phone.len(), "Phone number is ambiguous, skipping"),
            }
        }

        self.fuzzy_match(credential).await
    }

    async fn fuzzy_match(&self, credential: &CanonicalCredential) -> StoreResult<MatchResult> {
        let (Some(name), Some(dob)) = (credential.recipient_name.as_deref(), credential.recipient_dob)
        else {
            return Ok(MatchResult::no_match(MatchDetails::default()));
        };

        let Some((from, to)) = dob_window(dob) else {
            debug!(%dob, "Birth date outside the searchable range, skipping fuzzy step");
            return Ok(MatchResult::no_match(MatchDetails::default()));
        };
        let candidates = self
            .learners
            .find_by_dob_range(from, to, FUZZY_CANDIDATE_LIMIT)
            .await?;

        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let similarity = name_similarity(name, &candidate.name);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((i, similarity));
            }
        }

        let details = MatchDetails {
            matched_value: None,
            candidates_considered: candidates.len(),
            best_similarity: best.map(|(_, s)| s),
        };

        match best {
            Some((i, similarity)) if similarity >= self.threshold => {
                debug!(similarity, "Fuzzy match accepted");
                Ok(MatchResult::matched(
                    candidates[i].id,
                    similarity,
                    MatchType::Fuzzy,
                    MatchDetails {
                        matched_value: Some(candidates[i].name.clone()),
                        ..details
                    },
                ))
            }
            _ => Ok(MatchResult::no_match(details)),
        }
    }
}

/// `dob` plus or minus the window. `None` for dates a store cannot hold
/// or whose window would leave the calendar.
fn dob_window(dob: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    if !(1..=9999).contains(&dob.year()) {
        return None;
    }
    let window = Duration::days(DOB_WINDOW_DAYS);
    Some((dob.checked_sub_signed(window)?, dob.checked_add_signed(window)?))
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

fn matched_on(value: &str) -> MatchDetails {
    MatchDetails {
        matched_value: Some(value.to_string()),
        ..MatchDetails::default()
    }
}
