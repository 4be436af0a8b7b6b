//! Identify request and consolidated response models.
//!
//! # Responsibility
//! - Normalize caller input into the shape the resolver relies on.
//! - Define the consolidated identity view and its wire format.
//!
//! # Invariants
//! - A constructed `IdentifyRequest` always carries at least one identifier.
//! - Emails are trimmed and lower-cased; phone numbers are trimmed.
//! - Empty-after-trim values are treated as absent.

use crate::model::contact::ContactId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Input validation failure. This is the only user-actionable error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyRequestError {
    /// Neither email nor phone number was supplied.
    MissingIdentifier,
}

impl Display for IdentifyRequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => {
                write!(f, "at least one of email or phoneNumber is required")
            }
        }
    }
}

impl Error for IdentifyRequestError {}

/// Normalized identify input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyRequest {
    email: Option<String>,
    phone_number: Option<String>,
}

impl IdentifyRequest {
    /// Normalizes raw caller input.
    ///
    /// Values are otherwise taken verbatim; a phone like `+1 555 0100` keeps
    /// its inner spaces.
    ///
    /// # Errors
    /// - `MissingIdentifier` when both values are absent or blank.
    pub fn new(
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Self, IdentifyRequestError> {
        let email = normalize_value(email).map(|value| value.to_lowercase());
        let phone_number = normalize_value(phone_number);
        if email.is_none() && phone_number.is_none() {
            return Err(IdentifyRequestError::MissingIdentifier);
        }
        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

fn normalize_value(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Consolidated view of one identity cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedContact {
    pub primary_contact_id: ContactId,
    /// Primary's email first, then distinct secondary emails in cluster order.
    pub emails: Vec<String>,
    /// Primary's phone first, then distinct secondary phones in cluster order.
    pub phone_numbers: Vec<String>,
    /// Every non-primary member in cluster order.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Wire envelope: `{"contact": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedContact,
}
