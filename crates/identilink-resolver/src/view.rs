//! Consolidated view assembly.

use std::collections::HashSet;

use identilink_core::{Contact, ContactId, ContactView};
use identilink_store::{ContactFilter, ContactTransaction, StoreError};

/// Fold `members` into the view headed by `canonical`.
///
/// The canonical record's own email and phone number lead their lists. Other
/// distinct values follow in the order they first appear in `members`.
/// Secondary ids keep the order of `members`.
pub fn build_view(canonical: &Contact, members: &[Contact]) -> ContactView {
    let mut emails = DistinctList::default();
    let mut phone_numbers = DistinctList::default();
    emails.push(canonical.email.as_deref());
    phone_numbers.push(canonical.phone_number.as_deref());

    let mut secondary_contact_ids = Vec::with_capacity(members.len());
    for member in members {
        emails.push(member.email.as_deref());
        phone_numbers.push(member.phone_number.as_deref());
        if member.id != canonical.id {
            secondary_contact_ids.push(member.id);
        }
    }

    ContactView {
        primary_contact_id: canonical.id,
        emails: emails.items,
        phone_numbers: phone_numbers.items,
        secondary_contact_ids,
    }
}

/// Re-read the cluster rooted at `canonical_id` and build its view.
pub fn assemble_view(
    tx: &mut dyn ContactTransaction,
    canonical_id: ContactId,
) -> Result<ContactView, StoreError> {
    let members = tx.find(&ContactFilter::rooted_at(canonical_id))?;
    let canonical = members
        .iter()
        .find(|c| c.id == canonical_id)
        .ok_or(StoreError::NotFound(canonical_id))?;
    Ok(build_view(canonical, &members))
}

#[derive(Default)]
struct DistinctList {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl DistinctList {
    fn push(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            if self.seen.insert(value.to_string()) {
                self.items.push(value.to_string());
            }
        }
    }
}
