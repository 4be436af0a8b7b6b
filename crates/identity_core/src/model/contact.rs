//! Contact domain model.
//!
//! # Responsibility
//! - Define the canonical contact record persisted by the store.
//! - Provide validation for the primary/secondary link shape.
//!
//! # Invariants
//! - At least one of `email` / `phone_number` is set.
//! - `linked_id` is set iff `link_precedence == Secondary`.
//! - A contact never links to itself.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store-assigned contact identifier. Monotonic in insertion order.
pub type ContactId = i64;

/// Role of a contact inside its identity cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkPrecedence {
    /// Canonical record of a cluster.
    Primary,
    /// Alias pointing at the cluster's primary.
    Secondary,
}

impl LinkPrecedence {
    /// Stable string stored in `contacts.link_precedence`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parses the persisted string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Validation errors for contact link shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone number is present.
    MissingIdentifier,
    /// A primary carries a `linked_id`.
    PrimaryWithLink { linked_id: ContactId },
    /// A secondary has no `linked_id`.
    SecondaryWithoutLink,
    /// A contact points at itself.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => {
                write!(f, "contact requires at least one of email or phone_number")
            }
            Self::PrimaryWithLink { linked_id } => {
                write!(f, "primary contact must not link to {linked_id}")
            }
            Self::SecondaryWithoutLink => write!(f, "secondary contact requires linked_id"),
            Self::SelfLink(id) => write!(f, "contact {id} cannot link to itself"),
        }
    }
}

impl Error for ContactValidationError {}

/// Persisted contact record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Owning primary. `None` for primaries.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Epoch ms creation timestamp; ordering authority.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
    /// Soft-delete tombstone in epoch ms.
    pub deleted_at: Option<i64>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns the id of the primary that owns this contact.
    ///
    /// For a well-formed secondary this is `linked_id`; primaries own themselves.
    pub fn primary_id(&self) -> ContactId {
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Secondary, Some(linked_id)) => linked_id,
            _ => self.id,
        }
    }

    /// Ordering key shared by every cluster listing: oldest first, id breaks ties.
    pub fn creation_order_key(&self) -> (i64, ContactId) {
        (self.created_at, self.id)
    }

    /// Validates the link shape of a persisted contact.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_shape(
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.link_precedence,
            self.linked_id,
        )?;
        if self.linked_id == Some(self.id) {
            return Err(ContactValidationError::SelfLink(self.id));
        }
        Ok(())
    }
}

/// Insert model; the store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// First record of a never-seen identity.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// New alias for the cluster owned by `primary_id`.
    pub fn secondary(
        primary_id: ContactId,
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }

    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_shape(
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.link_precedence,
            self.linked_id,
        )
    }
}

/// Partial update model. Only link fields are mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContactUpdate {
    pub linked_id: Option<ContactId>,
    pub link_precedence: Option<LinkPrecedence>,
}

impl ContactUpdate {
    /// Demotes a primary (or re-points a secondary) under `primary_id`.
    pub fn link_to(primary_id: ContactId) -> Self {
        Self {
            linked_id: Some(primary_id),
            link_precedence: Some(LinkPrecedence::Secondary),
        }
    }
}

fn validate_shape(
    email: Option<&str>,
    phone_number: Option<&str>,
    link_precedence: LinkPrecedence,
    linked_id: Option<ContactId>,
) -> Result<(), ContactValidationError> {
    if email.is_none() && phone_number.is_none() {
        return Err(ContactValidationError::MissingIdentifier);
    }
    match (link_precedence, linked_id) {
        (LinkPrecedence::Primary, Some(linked_id)) => {
            Err(ContactValidationError::PrimaryWithLink { linked_id })
        }
        (LinkPrecedence::Secondary, None) => Err(ContactValidationError::SecondaryWithoutLink),
        _ => Ok(()),
    }
}
