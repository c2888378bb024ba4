//! Storage traits for contact records.
//!
//! The resolver never touches a backend directly: it hands a unit of work to
//! [`ContactStore::transaction`] and performs every read and write through the
//! [`ContactTransaction`] it receives. Backends guarantee that the unit commits
//! as a whole or not at all.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use identilink_core::{Contact, ContactId, LinkPatch, NewContact, Observation};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    NotFound(ContactId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(ContactId),

    /// Another unit of work committed over the data this one read.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// The unit of work ran past its deadline and was rolled back.
    #[error("Operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,

    /// A stored row could not be decoded.
    #[error("Corrupt contact row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Conflicts are the only errors worth re-running a unit of work for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Equality filter over contact fields. `Any` is a logical OR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContactFilter {
    Email(String),
    PhoneNumber(String),
    IdIn(BTreeSet<ContactId>),
    LinkedIdIn(BTreeSet<ContactId>),
    Any(Vec<ContactFilter>),
}

impl ContactFilter {
    /// Records sharing either identifier of the observation. Absent sides
    /// are left out rather than matched as null.
    pub fn by_identifiers(observation: &Observation) -> Self {
        let mut any = Vec::with_capacity(2);
        if let Some(email) = observation.email() {
            any.push(ContactFilter::Email(email.to_string()));
        }
        if let Some(phone) = observation.phone_number() {
            any.push(ContactFilter::PhoneNumber(phone.to_string()));
        }
        ContactFilter::Any(any)
    }

    /// Records whose id is in `ids` or that link to one of `ids`.
    pub fn members_of(ids: BTreeSet<ContactId>) -> Self {
        ContactFilter::Any(vec![
            ContactFilter::IdIn(ids.clone()),
            ContactFilter::LinkedIdIn(ids),
        ])
    }

    /// A primary and everything linked to it.
    pub fn rooted_at(primary: ContactId) -> Self {
        Self::members_of(BTreeSet::from([primary]))
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        match self {
            ContactFilter::Email(email) => contact.email.as_deref() == Some(email.as_str()),
            ContactFilter::PhoneNumber(phone) => {
                contact.phone_number.as_deref() == Some(phone.as_str())
            }
            ContactFilter::IdIn(ids) => ids.contains(&contact.id),
            ContactFilter::LinkedIdIn(ids) => {
                contact.linked_id.is_some_and(|linked| ids.contains(&linked))
            }
            ContactFilter::Any(filters) => filters.iter().any(|f| f.matches(contact)),
        }
    }
}

/// Reads and writes available inside one unit of work.
///
/// `find` sees this unit's own uncommitted writes. Results come back in
/// ascending id order.
pub trait ContactTransaction {
    fn find(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>, StoreError>;

    /// Insert a record; the store assigns id and timestamps.
    fn create(&mut self, contact: NewContact) -> Result<Contact, StoreError>;

    /// Rewrite a record's link fields and bump `updated_at`.
    fn update_by_id(&mut self, id: ContactId, patch: LinkPatch) -> Result<Contact, StoreError>;
}

/// A unit of work. Returning `Err` rolls back everything it wrote.
pub type TransactionWork<'a> =
    dyn FnMut(&mut dyn ContactTransaction) -> Result<(), StoreError> + 'a;

/// Durable keyed storage of contact records.
///
/// # Safety Considerations
/// - `transaction` is the only serialization point; callers hold no locks
/// - A unit that loses a race reports `StoreError::Conflict` and leaves no writes
pub trait ContactStore: Send + Sync {
    /// Short backend name for health reporting.
    fn backend_name(&self) -> &'static str;

    /// Run `work` as one all-or-nothing unit.
    fn transaction(&self, work: &mut TransactionWork<'_>) -> Result<(), StoreError>;

    /// Every stored record in id order.
    fn all_contacts(&self) -> Result<Vec<Contact>, StoreError>;

    /// End the store's lifecycle. Later calls fail with `StoreError::Closed`.
    fn close(&self) -> Result<(), StoreError>;

    fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>, StoreError> {
        let mut found = Vec::new();
        self.transaction(&mut |tx| {
            found = tx.find(filter)?;
            Ok(())
        })?;
        Ok(found)
    }

    fn create(&self, contact: NewContact) -> Result<Contact, StoreError> {
        in_transaction(self, |tx| tx.create(contact.clone()))
    }

    fn update_by_id(&self, id: ContactId, patch: LinkPatch) -> Result<Contact, StoreError> {
        in_transaction(self, |tx| tx.update_by_id(id, patch))
    }
}

/// Run `work` in a transaction and hand back what it produced.
pub fn in_transaction<S, T>(
    store: &S,
    mut work: impl FnMut(&mut dyn ContactTransaction) -> Result<T, StoreError>,
) -> Result<T, StoreError>
where
    S: ContactStore + ?Sized,
{
    let mut output = None;
    store.transaction(&mut |tx| {
        output = Some(work(tx)?);
        Ok(())
    })?;
    output.ok_or_else(|| StoreError::Backend("transaction finished without output".to_string()))
}
