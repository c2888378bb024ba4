//! Identilink Store - contact storage behind a transactional trait
//!
//! Two backends: an in-memory store with optimistic, version-checked commits
//! (tests, single-node deployments) and a SQLite store for durable data.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryContactStore;
pub use sqlite::SqliteContactStore;
pub use traits::{
    in_transaction, ContactFilter, ContactStore, ContactTransaction, StoreError, TransactionWork,
};
