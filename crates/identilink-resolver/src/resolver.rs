//! The identify operation: one serializable unit per observation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use identilink_core::{ContactId, ContactView, NewContact, Observation, ResolverConfig};
use identilink_store::{in_transaction, ContactStore, ContactTransaction, StoreError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cluster::load_cluster;
use crate::elect::{elect, merge_into};
use crate::record::record_if_new;
use crate::view::{assemble_view, build_view};

/// Errors surfaced by [`IdentityResolver::identify`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Gave up after {attempts} conflicting attempts: {last}")]
    RetriesExhausted { attempts: u32, last: StoreError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::from(&ResolverConfig::default())
    }
}

impl From<&ResolverConfig> for ResolverOptions {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// What one identify call produced and changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub view: ContactView,
    /// Record written for this observation, primary or secondary.
    pub created: Option<ContactId>,
    pub demoted: Vec<ContactId>,
    pub relinked: Vec<ContactId>,
    /// Attempts used, conflicts included.
    pub attempts: u32,
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    options: ResolverOptions,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn ContactStore>, options: ResolverOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Resolve `observation` to its consolidated identity, merging and
    /// recording as needed.
    ///
    /// Blocks the calling thread. Conflicts re-run the whole unit from a
    /// fresh read; the request deadline covers every attempt and the waits
    /// between them.
    pub fn identify(&self, observation: &Observation) -> Result<Resolution, ResolveError> {
        let started = Instant::now();
        let deadline = started + self.options.request_timeout;
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = in_transaction(self.store.as_ref(), |tx| {
                let resolution = resolve_in(tx, observation)?;
                // Past this point the store commits; expiry must roll back.
                if Instant::now() >= deadline {
                    return Err(StoreError::Timeout(self.options.request_timeout));
                }
                Ok(resolution)
            });

            match result {
                Ok(mut resolution) => {
                    resolution.attempts = attempt;
                    info!(
                        primary = %resolution.view.primary_contact_id,
                        created = ?resolution.created,
                        demoted = resolution.demoted.len(),
                        relinked = resolution.relinked.len(),
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "identified contact"
                    );
                    return Ok(resolution);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let wait = self.options.retry_backoff * attempt;
                    if Instant::now() + wait >= deadline {
                        error!(attempt, "request deadline reached while retrying");
                        return Err(StoreError::Timeout(self.options.request_timeout).into());
                    }
                    warn!(attempt, error = %err, "identify conflicted, retrying");
                    std::thread::sleep(wait);
                }
                Err(err) if err.is_retryable() => {
                    error!(attempts = attempt, error = %err, "identify retries exhausted");
                    return Err(ResolveError::RetriesExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    error!(attempt, error = %err, "identify failed");
                    return Err(err.into());
                }
            }
        }
    }
}

/// One pass of load, elect and merge, record, and view against `tx`.
pub fn resolve_in(
    tx: &mut dyn ContactTransaction,
    observation: &Observation,
) -> Result<Resolution, StoreError> {
    let Some(cluster) = load_cluster(tx, observation)? else {
        let created = tx.create(NewContact::primary(observation))?;
        return Ok(Resolution {
            view: build_view(&created, std::slice::from_ref(&created)),
            created: Some(created.id),
            demoted: Vec::new(),
            relinked: Vec::new(),
            attempts: 0,
        });
    };

    debug!(
        direct = cluster.direct_matches().len(),
        members = cluster.len(),
        groups = cluster.groups().len(),
        "resolving cluster"
    );
    let election = elect(&cluster)
        .ok_or_else(|| StoreError::Backend("matched cluster has no members".to_string()))?;
    let (canonical, merge) = merge_into(tx, &cluster, &election)?;
    let recorded = record_if_new(tx, &canonical, cluster.members(), observation)?;
    let view = assemble_view(tx, canonical.id)?;

    Ok(Resolution {
        view,
        created: recorded.map(|c| c.id),
        demoted: merge.demoted,
        relinked: merge.relinked,
        attempts: 0,
    })
}
