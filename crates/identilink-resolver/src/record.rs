//! Recording observations that add something to a cluster.

use std::collections::HashSet;

use identilink_core::{Contact, NewContact, Observation};
use identilink_store::{ContactTransaction, StoreError};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Kind {
    Email,
    Phone,
}

/// Identifiers already present in a cluster, tagged by kind so an email
/// never satisfies a phone lookup and vice versa.
#[derive(Clone, Debug, Default)]
pub struct KnownIdentifiers {
    seen: HashSet<(Kind, String)>,
}

impl KnownIdentifiers {
    pub fn from_contacts<'a>(contacts: impl IntoIterator<Item = &'a Contact>) -> Self {
        let mut known = Self::default();
        for contact in contacts {
            if let Some(email) = &contact.email {
                known.seen.insert((Kind::Email, email.clone()));
            }
            if let Some(phone) = &contact.phone_number {
                known.seen.insert((Kind::Phone, phone.clone()));
            }
        }
        known
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.seen.contains(&(Kind::Email, email.to_string()))
    }

    pub fn has_phone(&self, phone: &str) -> bool {
        self.seen.contains(&(Kind::Phone, phone.to_string()))
    }

    /// True when `observation` carries an email or phone number not yet seen.
    pub fn is_new(&self, observation: &Observation) -> bool {
        let new_email = observation.email().is_some_and(|e| !self.has_email(e));
        let new_phone = observation.phone_number().is_some_and(|p| !self.has_phone(p));
        new_email || new_phone
    }
}

/// Store `observation` as a secondary of `canonical` when it adds an
/// identifier the cluster lacks.
///
/// The new record keeps both sides of the observation as given, including a
/// side the cluster already knows.
pub fn record_if_new<'a>(
    tx: &mut dyn ContactTransaction,
    canonical: &Contact,
    members: impl IntoIterator<Item = &'a Contact>,
    observation: &Observation,
) -> Result<Option<Contact>, StoreError> {
    let known = KnownIdentifiers::from_contacts(members);
    if !known.is_new(observation) {
        return Ok(None);
    }
    let created = tx.create(NewContact::secondary(observation, canonical.id))?;
    debug!(contact = %created.id, canonical = %canonical.id, "recorded new secondary");
    Ok(Some(created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use identilink_core::{ContactId, LinkPrecedence};

    fn contact(id: u64, email: Option<&str>, phone: Option<&str>) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(id),
            email: email.map(String::from),
            phone_number: phone.map(String::from),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn obs(email: Option<&str>, phone: Option<&str>) -> Observation {
        Observation::new(email.map(String::from), phone.map(String::from)).unwrap()
    }

    #[test]
    fn identifiers_are_tagged_by_kind() {
        // A phone number that happens to look like the stored email.
        let members = [contact(1, Some("555"), None)];
        let known = KnownIdentifiers::from_contacts(&members);
        assert!(known.has_email("555"));
        assert!(!known.has_phone("555"));
        assert!(known.is_new(&obs(None, Some("555"))));
    }

    #[test]
    fn known_pair_is_not_new() {
        let members = [contact(1, Some("a@x.com"), None), contact(2, None, Some("123"))];
        let known = KnownIdentifiers::from_contacts(&members);
        assert!(!known.is_new(&obs(Some("a@x.com"), Some("123"))));
        assert!(!known.is_new(&obs(Some("a@x.com"), None)));
        assert!(known.is_new(&obs(Some("a@x.com"), Some("999"))));
    }
}
