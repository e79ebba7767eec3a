//! Identifier types shared between the engine and its adapters
//!
//! Every identifier is an opaque string on the wire. The newtypes exist so a
//! contact id can never be passed where a participant assignment id is
//! expected: one contact may hold many assignment ids inside a package.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} must not be empty")]
pub struct IdParseError {
    pub kind: &'static str,
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(IdParseError { kind: $label });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A signable package
    PackageId,
    "package id"
);
string_id!(
    /// A placement on the package document
    FieldId,
    "field id"
);
string_id!(
    /// External handle a participant acts through, unique per (field, contact, role)
    ParticipantAssignmentId,
    "participant assignment id"
);
string_id!(
    /// An entry in the initiator's contact directory
    ContactId,
    "contact id"
);
string_id!(
    /// The account that owns packages and their credit balance
    InitiatorId,
    "initiator id"
);
