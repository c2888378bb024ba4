//! Identilink Resolver - clusters observations into one identity per person
//!
//! One `identify` call runs four steps inside a single store transaction:
//! load the cluster, elect and merge primaries, record the observation if it
//! adds anything, and assemble the consolidated view.

pub mod cluster;
pub mod elect;
pub mod record;
pub mod resolver;
pub mod view;

pub use cluster::{load_cluster, Cluster};
pub use elect::{elect, merge_into, Election, MergeOutcome};
pub use record::{record_if_new, KnownIdentifiers};
pub use resolver::{resolve_in, IdentityResolver, Resolution, ResolveError, ResolverOptions};
pub use view::{assemble_view, build_view};
