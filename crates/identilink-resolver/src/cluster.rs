//! Cluster loading.
//!
//! A cluster is a primary plus the secondaries that link straight to it, or
//! several such groups that the current observation is about to join. Merges
//! re-link every descendant of a demoted primary, so stored clusters are never
//! deeper than two levels. Records written before that rule held may still
//! hang off a demoted primary, so the loader keeps expanding in both
//! directions (ids a member links to, and members linking to loaded ids)
//! until a round adds nothing new.

use std::collections::{BTreeMap, BTreeSet};

use identilink_core::{Contact, ContactId, Observation};
use identilink_store::{ContactFilter, ContactTransaction, StoreError};
use tracing::{debug, warn};

const MAX_EXPANSION_ROUNDS: usize = 16;

/// The records relevant to one observation, keyed by id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    direct_matches: BTreeSet<ContactId>,
    members: BTreeMap<ContactId, Contact>,
}

impl Cluster {
    pub fn new(
        direct_matches: impl IntoIterator<Item = ContactId>,
        members: impl IntoIterator<Item = Contact>,
    ) -> Self {
        Self {
            direct_matches: direct_matches.into_iter().collect(),
            members: members.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    /// Ids of the records that share an identifier with the observation.
    pub fn direct_matches(&self) -> &BTreeSet<ContactId> {
        &self.direct_matches
    }

    /// Members in ascending id order.
    pub fn members(&self) -> impl Iterator<Item = &Contact> {
        self.members.values()
    }

    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.members.get(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Contact> {
        self.members.values().filter(|c| c.is_primary())
    }

    /// Member ids grouped under the primary each one resolves to.
    pub fn groups(&self) -> BTreeMap<ContactId, BTreeSet<ContactId>> {
        let mut groups: BTreeMap<ContactId, BTreeSet<ContactId>> = BTreeMap::new();
        for contact in self.members.values() {
            groups
                .entry(contact.primary_id())
                .or_default()
                .insert(contact.id);
        }
        groups
    }
}

fn seeds(contacts: &[Contact]) -> BTreeSet<ContactId> {
    contacts
        .iter()
        .flat_map(|c| std::iter::once(c.id).chain(c.linked_id))
        .collect()
}

/// Find every record sharing an identifier with `observation` and expand to
/// the full cluster. `None` means nothing matched.
pub fn load_cluster(
    tx: &mut dyn ContactTransaction,
    observation: &Observation,
) -> Result<Option<Cluster>, StoreError> {
    let direct = tx.find(&ContactFilter::by_identifiers(observation))?;
    if direct.is_empty() {
        return Ok(None);
    }

    let direct_ids: Vec<ContactId> = direct.iter().map(|c| c.id).collect();
    let mut ids = seeds(&direct);

    for round in 0..MAX_EXPANSION_ROUNDS {
        let members = tx.find(&ContactFilter::members_of(ids.clone()))?;
        let grown: BTreeSet<ContactId> = seeds(&members).difference(&ids).copied().collect();

        if grown.is_empty() {
            debug!(
                direct = direct_ids.len(),
                members = members.len(),
                rounds = round + 1,
                "loaded cluster"
            );
            return Ok(Some(Cluster::new(direct_ids, members)));
        }

        // Round 0 normally picks up the primary's secondaries; later growth
        // means records still hang off a demoted primary.
        if round > 0 {
            warn!(round, grown = grown.len(), "cluster has multi-hop links, expanding");
        }
        ids.extend(grown);
    }

    Err(StoreError::Backend(
        "cluster expansion exceeded hop limit".to_string(),
    ))
}
