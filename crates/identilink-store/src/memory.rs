//! In-memory storage backend.
//!
//! Thread-safe, optimistic implementation of [`ContactStore`]. A transaction
//! records the store version when it begins, reads committed state overlaid
//! with its own staged writes, and commits only if no other transaction has
//! committed in between. A stale unit gets `StoreError::Conflict` and its
//! staged writes are discarded.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;

use identilink_core::{Contact, ContactId, LinkPatch, NewContact};

use crate::traits::{ContactFilter, ContactStore, ContactTransaction, StoreError, TransactionWork};

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct ContactState {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    /// Bumped on every commit that wrote something.
    version: u64,
}

impl ContactState {
    /// Candidate ids for `filter`, answered from the indexes.
    fn candidates(&self, filter: &ContactFilter, out: &mut BTreeSet<ContactId>) {
        match filter {
            ContactFilter::Email(email) => {
                if let Some(ids) = self.by_email.get(email) {
                    out.extend(ids);
                }
            }
            ContactFilter::PhoneNumber(phone) => {
                if let Some(ids) = self.by_phone.get(phone) {
                    out.extend(ids);
                }
            }
            ContactFilter::IdIn(ids) => {
                out.extend(ids.iter().filter(|id| self.by_id.contains_key(id)));
            }
            ContactFilter::LinkedIdIn(ids) => {
                for id in ids {
                    if let Some(linked) = self.by_linked.get(id) {
                        out.extend(linked);
                    }
                }
            }
            ContactFilter::Any(filters) => {
                for f in filters {
                    self.candidates(f, out);
                }
            }
        }
    }

    fn put(&mut self, contact: Contact) {
        if let Some(old) = self.by_id.get(&contact.id) {
            if let Some(linked) = old.linked_id {
                if let Some(set) = self.by_linked.get_mut(&linked) {
                    set.remove(&old.id);
                }
            }
        } else {
            if let Some(email) = &contact.email {
                self.by_email
                    .entry(email.clone())
                    .or_default()
                    .insert(contact.id);
            }
            if let Some(phone) = &contact.phone_number {
                self.by_phone
                    .entry(phone.clone())
                    .or_default()
                    .insert(contact.id);
            }
        }
        if let Some(linked) = contact.linked_id {
            self.by_linked.entry(linked).or_default().insert(contact.id);
        }
        self.by_id.insert(contact.id, contact);
    }
}

/// Thread-safe in-memory contact store.
#[derive(Debug)]
pub struct InMemoryContactStore {
    state: RwLock<ContactState>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for InMemoryContactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContactStore {
    /// Create a new empty store. Ids start at 1.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ContactState::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert a fully formed record, keeping its id and timestamps.
    ///
    /// Used to load fixtures and imported data. Later `create` calls never
    /// reuse an id at or below the highest one inserted here.
    pub fn insert_existing(&self, contact: Contact) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| lock_err("contact.insert"))?;
        if state.by_id.contains_key(&contact.id) {
            return Err(StoreError::DuplicateKey(contact.id));
        }
        self.next_id
            .fetch_max(contact.id.get().saturating_add(1), Ordering::SeqCst);
        state.put(contact);
        state.version += 1;
        Ok(())
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("contact.len"))?;
        Ok(state.by_id.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn commit(&self, base_version: u64, staged: BTreeMap<ContactId, Contact>) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.commit"))?;
        if state.version != base_version {
            return Err(StoreError::Conflict(format!(
                "store moved from version {base_version} to {} during transaction",
                state.version
            )));
        }
        if staged.is_empty() {
            return Ok(());
        }
        let written = staged.len();
        for contact in staged.into_values() {
            state.put(contact);
        }
        state.version += 1;
        debug!(written, version = state.version, "memory store commit");
        Ok(())
    }
}

struct MemoryTransaction<'a> {
    store: &'a InMemoryContactStore,
    staged: BTreeMap<ContactId, Contact>,
}

impl ContactTransaction for MemoryTransaction<'_> {
    fn find(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>, StoreError> {
        let state = self.store.state.read().map_err(|_| lock_err("contact.find"))?;
        let mut ids = BTreeSet::new();
        state.candidates(filter, &mut ids);
        ids.extend(self.staged.keys());

        Ok(ids
            .into_iter()
            .filter_map(|id| self.staged.get(&id).or_else(|| state.by_id.get(&id)))
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    fn create(&mut self, contact: NewContact) -> Result<Contact, StoreError> {
        let id = ContactId::new(self.store.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let contact = Contact {
            id,
            email: contact.email,
            phone_number: contact.phone_number,
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.staged.insert(id, contact.clone());
        Ok(contact)
    }

    fn update_by_id(&mut self, id: ContactId, patch: LinkPatch) -> Result<Contact, StoreError> {
        let current = match self.staged.get(&id) {
            Some(c) => c.clone(),
            None => {
                let state = self.store.state.read().map_err(|_| lock_err("contact.update"))?;
                state.by_id.get(&id).cloned().ok_or(StoreError::NotFound(id))?
            }
        };
        let mut updated = current;
        updated.link_precedence = patch.link_precedence;
        updated.linked_id = patch.linked_id;
        updated.updated_at = Utc::now();
        self.staged.insert(id, updated.clone());
        Ok(updated)
    }
}

impl ContactStore for InMemoryContactStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn transaction(&self, work: &mut TransactionWork<'_>) -> Result<(), StoreError> {
        self.ensure_open()?;
        let base_version = self
            .state
            .read()
            .map_err(|_| lock_err("contact.begin"))?
            .version;
        let mut tx = MemoryTransaction {
            store: self,
            staged: BTreeMap::new(),
        };
        work(&mut tx)?;
        self.commit(base_version, tx.staged)
    }

    fn all_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("contact.all"))?;
        Ok(state.by_id.values().cloned().collect())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::in_transaction;
    use identilink_core::{LinkPrecedence, Observation};

    fn observation(email: Option<&str>, phone: Option<&str>) -> Observation {
        Observation::new(email.map(String::from), phone.map(String::from)).unwrap()
    }

    #[test]
    fn create_assigns_increasing_ids() {
        let store = InMemoryContactStore::new();
        let a = store.create(NewContact::primary(&observation(Some("a@x.com"), None))).unwrap();
        let b = store.create(NewContact::primary(&observation(None, Some("1")))).unwrap();
        assert!(a.id < b.id);
        assert!(a.created_at <= b.created_at);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn find_sees_own_staged_writes() {
        let store = InMemoryContactStore::new();
        let found = in_transaction(&store, |tx| {
            tx.create(NewContact::primary(&observation(Some("a@x.com"), None)))?;
            tx.find(&ContactFilter::Email("a@x.com".into()))
        })
        .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn failed_unit_leaves_no_writes() {
        let store = InMemoryContactStore::new();
        let result = in_transaction(&store, |tx| {
            tx.create(NewContact::primary(&observation(Some("a@x.com"), None)))?;
            Err::<(), _>(StoreError::Backend("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn concurrent_commit_causes_conflict() {
        let store = InMemoryContactStore::new();
        let result = in_transaction(&store, |tx| {
            tx.find(&ContactFilter::Email("a@x.com".into()))?;
            // Another unit commits between this unit's read and commit.
            store.create(NewContact::primary(&observation(Some("a@x.com"), None)))?;
            tx.create(NewContact::primary(&observation(Some("a@x.com"), None)))
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn update_moves_linked_index() {
        let store = InMemoryContactStore::new();
        let a = store.create(NewContact::primary(&observation(Some("a@x.com"), None))).unwrap();
        let b = store.create(NewContact::primary(&observation(Some("b@x.com"), None))).unwrap();
        let c = store
            .create(NewContact::secondary(&observation(Some("c@x.com"), None), b.id))
            .unwrap();

        store.update_by_id(c.id, LinkPatch::link_to(a.id)).unwrap();

        let under_b = store.find(&ContactFilter::rooted_at(b.id)).unwrap();
        assert_eq!(under_b.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b.id]);
        let under_a = store.find(&ContactFilter::rooted_at(a.id)).unwrap();
        assert_eq!(under_a.len(), 2);
        assert_eq!(under_a[1].link_precedence, LinkPrecedence::Secondary);
    }

    #[test]
    fn update_missing_contact_is_not_found() {
        let store = InMemoryContactStore::new();
        let err = store
            .update_by_id(ContactId::new(42), LinkPatch::link_to(ContactId::new(1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == ContactId::new(42)));
    }

    #[test]
    fn insert_existing_reserves_ids() {
        let store = InMemoryContactStore::new();
        let now = Utc::now();
        store
            .insert_existing(Contact {
                id: ContactId::new(10),
                email: Some("a@x.com".into()),
                phone_number: None,
                linked_id: None,
                link_precedence: LinkPrecedence::Primary,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .unwrap();
        let next = store.create(NewContact::primary(&observation(None, Some("9")))).unwrap();
        assert_eq!(next.id, ContactId::new(11));
    }

    #[test]
    fn closed_store_rejects_work() {
        let store = InMemoryContactStore::new();
        store.close().unwrap();
        assert!(matches!(store.all_contacts(), Err(StoreError::Closed)));
        assert!(matches!(
            store.find(&ContactFilter::Email("a".into())),
            Err(StoreError::Closed)
        ));
    }
}
