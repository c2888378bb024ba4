//! Core types for Identilink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Store-assigned contact identifier. Monotonic per store, never reused.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContactId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Whether a contact is the canonical record of its cluster.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(LinkPrecedence::Primary),
            "secondary" => Some(LinkPrecedence::Secondary),
            _ => None,
        }
    }
}

impl std::fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored contact record.
///
/// `email` and `phone_number` never change after creation. Only the link
/// fields move: primary to secondary on merge, or secondary to primary when
/// a cluster has lost its root and must be repaired.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Id of the primary this record belongs to: its own id when primary,
    /// otherwise the id it links to.
    pub fn primary_id(&self) -> ContactId {
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Secondary, Some(linked)) => linked,
            _ => self.id,
        }
    }

    /// Ordering key for canonical election: oldest first, lowest id on ties.
    pub fn election_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }
}

/// Fields supplied by the resolver when creating a contact. The store
/// assigns `id`, `created_at` and `updated_at`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// A fresh cluster root carrying the whole observation.
    pub fn primary(observation: &Observation) -> Self {
        Self {
            email: observation.email.clone(),
            phone_number: observation.phone_number.clone(),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// A linked record capturing the exact observation, known parts included.
    pub fn secondary(observation: &Observation, primary: ContactId) -> Self {
        Self {
            email: observation.email.clone(),
            phone_number: observation.phone_number.clone(),
            linked_id: Some(primary),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

/// Partial update of a contact's link fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkPatch {
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl LinkPatch {
    pub fn link_to(primary: ContactId) -> Self {
        Self {
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary),
        }
    }

    /// Make a record the root of its cluster again.
    pub fn promote() -> Self {
        Self {
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// True when applying this patch would not change `contact`.
    pub fn is_noop_for(&self, contact: &Contact) -> bool {
        contact.link_precedence == self.link_precedence && contact.linked_id == self.linked_id
    }
}

/// A normalized `(email, phoneNumber)` pair. At least one side is present
/// and neither side is blank.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Observation {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Observation {
    /// Trims both identifiers, drops blank ones, and rejects an observation
    /// with nothing left.
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Result<Self> {
        let email = normalize(email);
        let phone_number = normalize(phone_number);
        if email.is_none() && phone_number.is_none() {
            return Err(Error::MissingIdentifier);
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

fn normalize(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

/// The consolidated identity returned to callers.
///
/// `primaryContatctId` is spelled the way existing clients expect it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactView {
    #[serde(rename = "primaryContatctId")]
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    #[serde(rename = "phoneNumbers")]
    pub phone_numbers: Vec<String>,
    #[serde(rename = "secondaryContactIds")]
    pub secondary_contact_ids: Vec<ContactId>,
}
