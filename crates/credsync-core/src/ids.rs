//! Strongly typed identifiers.
//!
//! Every record the sync pipeline touches is keyed by a UUID. Wrapping them
//! in newtypes keeps an issuer id from being passed where a learner id is
//! expected.
//!
//! ```
//! use credsync_core::{IssuerId, LearnerId};
//!
//! let issuer = IssuerId::new();
//! let parsed: IssuerId = issuer.to_string().parse().unwrap();
//! assert_eq!(issuer, parsed);
//!
//! fn link(_learner: LearnerId) {}
//! link(LearnerId::new());
//! // link(issuer); // does not compile
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Failure to parse an identifier from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    pub id_type: &'static str,
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            #[must_use]
            pub fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    message: e.to_string(),
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifier of an issuing organisation registered on the platform.
    IssuerId
);

define_id!(
    /// Identifier of a learner identity in the platform's directory.
    LearnerId
);

define_id!(
    /// Identifier of a persisted external credential record.
    CredentialRecordId
);

define_id!(
    /// Identifier of a queued credential job.
    JobId
);

define_id!(
    /// Identifier of a dead-letter entry.
    DlqEntryId
);
