//! Offline cluster listing straight from a contact store.

use std::collections::BTreeMap;

use identilink_core::{Contact, ContactId, ContactView};
use identilink_resolver::build_view;
use identilink_store::{ContactStore, StoreError};

/// One stored cluster: the record members resolve to, and the members.
pub struct StoredCluster {
    pub primary_id: ContactId,
    pub members: Vec<Contact>,
}

impl StoredCluster {
    pub fn primary(&self) -> Option<&Contact> {
        self.members
            .iter()
            .find(|c| c.id == self.primary_id && c.is_primary())
    }

    /// The consolidated view, or `None` when the primary is missing.
    pub fn view(&self) -> Option<ContactView> {
        self.primary().map(|p| build_view(p, &self.members))
    }
}

/// Group every stored record under the primary it links to, in id order.
pub fn load_clusters(store: &dyn ContactStore) -> Result<Vec<StoredCluster>, StoreError> {
    let mut groups: BTreeMap<ContactId, Vec<Contact>> = BTreeMap::new();
    for contact in store.all_contacts()? {
        groups.entry(contact.primary_id()).or_default().push(contact);
    }
    Ok(groups
        .into_iter()
        .map(|(primary_id, members)| StoredCluster {
            primary_id,
            members,
        })
        .collect())
}

pub fn render(cluster: &StoredCluster) -> String {
    let mut out = String::new();
    match cluster.primary() {
        Some(_) => out.push_str(&format!("cluster #{}\n", cluster.primary_id)),
        None => out.push_str(&format!(
            "cluster #{} (primary missing)\n",
            cluster.primary_id
        )),
    }
    for c in &cluster.members {
        out.push_str(&format!(
            "  #{:<6} {:<9} email={:<24} phone={:<14} created={}\n",
            c.id,
            c.link_precedence.as_str(),
            c.email.as_deref().unwrap_or("-"),
            c.phone_number.as_deref().unwrap_or("-"),
            c.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    out
}
