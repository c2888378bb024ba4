//! Canonical election and cluster merge.

use identilink_core::{Contact, ContactId, LinkPatch};
use identilink_store::{ContactTransaction, StoreError};
use tracing::{debug, warn};

use crate::cluster::Cluster;

/// The record chosen to head a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Election {
    pub canonical: Contact,
    /// The cluster had no primary left and the canonical record must be
    /// promoted before anything links to it.
    pub needs_promotion: bool,
}

/// Writes performed while folding a cluster under its canonical record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Former primaries now secondary.
    pub demoted: Vec<ContactId>,
    /// Secondaries re-pointed at the canonical record.
    pub relinked: Vec<ContactId>,
    pub promoted: bool,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.demoted.is_empty() && self.relinked.is_empty() && !self.promoted
    }
}

/// Pick the oldest primary, breaking `created_at` ties by lowest id.
///
/// A cluster whose primaries have all gone missing falls back to its oldest
/// member. Returns `None` only for an empty cluster.
pub fn elect(cluster: &Cluster) -> Option<Election> {
    if let Some(primary) = cluster.primaries().min_by_key(|c| c.election_key()) {
        return Some(Election {
            canonical: primary.clone(),
            needs_promotion: false,
        });
    }
    let oldest = cluster.members().min_by_key(|c| c.election_key())?;
    warn!(contact = %oldest.id, "cluster has no primary, promoting oldest member");
    Some(Election {
        canonical: oldest.clone(),
        needs_promotion: true,
    })
}

/// Point every other member of `cluster` directly at the elected record.
///
/// Other primaries are demoted and their secondaries re-linked in the same
/// unit of work, so no member is left behind a demoted primary. Members that
/// already link to the canonical record are not written.
pub fn merge_into(
    tx: &mut dyn ContactTransaction,
    cluster: &Cluster,
    election: &Election,
) -> Result<(Contact, MergeOutcome), StoreError> {
    let mut outcome = MergeOutcome::default();
    let mut canonical = election.canonical.clone();

    if election.needs_promotion {
        canonical = tx.update_by_id(canonical.id, LinkPatch::promote())?;
        outcome.promoted = true;
    }

    let patch = LinkPatch::link_to(canonical.id);
    for member in cluster.members() {
        if member.id == canonical.id || patch.is_noop_for(member) {
            continue;
        }
        tx.update_by_id(member.id, patch)?;
        if member.is_primary() {
            outcome.demoted.push(member.id);
        } else {
            outcome.relinked.push(member.id);
        }
    }

    if !outcome.is_empty() {
        debug!(
            canonical = %canonical.id,
            demoted = ?outcome.demoted,
            relinked = ?outcome.relinked,
            "merged cluster"
        );
    }
    Ok((canonical, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use identilink_core::LinkPrecedence;

    fn contact(id: u64, linked: Option<u64>, age_secs: i64) -> Contact {
        let at = Utc::now() - Duration::seconds(age_secs);
        Contact {
            id: ContactId::new(id),
            email: Some(format!("{id}@x.com")),
            phone_number: None,
            linked_id: linked.map(ContactId::new),
            link_precedence: if linked.is_some() {
                LinkPrecedence::Secondary
            } else {
                LinkPrecedence::Primary
            },
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    #[test]
    fn oldest_primary_wins() {
        let cluster = Cluster::new(
            [ContactId::new(1)],
            vec![contact(1, None, 10), contact(2, None, 50), contact(3, Some(1), 90)],
        );
        let election = elect(&cluster).unwrap();
        // 3 is older but secondary, so it is not a candidate.
        assert_eq!(election.canonical.id, ContactId::new(2));
        assert!(!election.needs_promotion);
    }

    #[test]
    fn equal_timestamps_pick_lowest_id() {
        let mut a = contact(9, None, 0);
        let mut b = contact(4, None, 0);
        let at = Utc::now();
        a.created_at = at;
        b.created_at = at;
        let cluster = Cluster::new([a.id, b.id], vec![a, b]);
        assert_eq!(elect(&cluster).unwrap().canonical.id, ContactId::new(4));
    }

    #[test]
    fn orphaned_cluster_promotes_oldest_member() {
        let cluster = Cluster::new(
            [ContactId::new(5)],
            vec![contact(5, Some(99), 10), contact(6, Some(99), 20)],
        );
        let election = elect(&cluster).unwrap();
        assert_eq!(election.canonical.id, ContactId::new(6));
        assert!(election.needs_promotion);
    }

    #[test]
    fn empty_cluster_has_no_election() {
        let cluster = Cluster::new(Vec::<ContactId>::new(), Vec::<Contact>::new());
        assert!(elect(&cluster).is_none());
    }
}
