//! SQLite storage backend.
//!
//! Every unit of work runs inside `BEGIN IMMEDIATE`, so a writer takes the
//! database lock before its first read. Several service instances can share
//! one database file; a unit that cannot get the lock within the busy
//! timeout reports `StoreError::Conflict` and is retried by the caller.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, TransactionBehavior};
use tracing::{debug, info};

use identilink_core::{Contact, ContactId, LinkPatch, LinkPrecedence, NewContact};

use crate::traits::{ContactFilter, ContactStore, ContactTransaction, StoreError, TransactionWork};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contacts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    phone_number    TEXT,
    email           TEXT,
    linked_id       INTEGER REFERENCES contacts(id),
    link_precedence TEXT NOT NULL CHECK (link_precedence IN ('primary', 'secondary')),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    deleted_at      TEXT
);
CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);
CREATE INDEX IF NOT EXISTS idx_contacts_phone_number ON contacts(phone_number);
CREATE INDEX IF NOT EXISTS idx_contacts_linked_id ON contacts(linked_id);
";

const COLUMNS: &str =
    "id, phone_number, email, linked_id, link_precedence, created_at, updated_at, deleted_at";

fn map_sqlite_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked =>
        {
            StoreError::Conflict(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn to_sql_id(id: ContactId) -> Result<i64, StoreError> {
    i64::try_from(id.get())
        .map_err(|_| StoreError::Backend(format!("contact id {id} exceeds sqlite integer range")))
}

fn from_sql_id(row_id: i64, raw: i64) -> Result<ContactId, StoreError> {
    u64::try_from(raw)
        .map(ContactId::new)
        .map_err(|_| StoreError::Corrupt {
            id: row_id,
            reason: format!("negative contact id {raw}"),
        })
}

/// A raw row, decoded into a [`Contact`] outside the rusqlite row callback.
struct ContactRow {
    id: i64,
    phone_number: Option<String>,
    email: Option<String>,
    linked_id: Option<i64>,
    link_precedence: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl ContactRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            phone_number: row.get(1)?,
            email: row.get(2)?,
            linked_id: row.get(3)?,
            link_precedence: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            deleted_at: row.get(7)?,
        })
    }

    fn into_contact(self) -> Result<Contact, StoreError> {
        let link_precedence =
            LinkPrecedence::parse(&self.link_precedence).ok_or_else(|| StoreError::Corrupt {
                id: self.id,
                reason: format!("unknown link precedence '{}'", self.link_precedence),
            })?;
        let linked_id = self
            .linked_id
            .map(|raw| from_sql_id(self.id, raw))
            .transpose()?;
        Ok(Contact {
            id: from_sql_id(self.id, self.id)?,
            email: self.email,
            phone_number: self.phone_number,
            linked_id,
            link_precedence,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Render `filter` as a WHERE clause, pushing bind values in order.
fn where_clause(filter: &ContactFilter, values: &mut Vec<Value>) -> Result<String, StoreError> {
    Ok(match filter {
        ContactFilter::Email(email) => {
            values.push(Value::Text(email.clone()));
            "email = ?".to_string()
        }
        ContactFilter::PhoneNumber(phone) => {
            values.push(Value::Text(phone.clone()));
            "phone_number = ?".to_string()
        }
        ContactFilter::IdIn(ids) | ContactFilter::LinkedIdIn(ids) => {
            if ids.is_empty() {
                return Ok("0".to_string());
            }
            for id in ids {
                values.push(Value::Integer(to_sql_id(*id)?));
            }
            let column = if matches!(filter, ContactFilter::IdIn(_)) {
                "id"
            } else {
                "linked_id"
            };
            format!("{column} IN ({})", vec!["?"; ids.len()].join(", "))
        }
        ContactFilter::Any(filters) => {
            if filters.is_empty() {
                return Ok("0".to_string());
            }
            let parts = filters
                .iter()
                .map(|f| where_clause(f, values))
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", parts.join(" OR "))
        }
    })
}

fn select(conn: &Connection, filter: Option<&ContactFilter>) -> Result<Vec<Contact>, StoreError> {
    let mut values = Vec::new();
    let sql = match filter {
        Some(filter) => format!(
            "SELECT {COLUMNS} FROM contacts WHERE {} ORDER BY id ASC",
            where_clause(filter, &mut values)?
        ),
        None => format!("SELECT {COLUMNS} FROM contacts ORDER BY id ASC"),
    };
    let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), ContactRow::read)
        .map_err(map_sqlite_err)?;
    let contacts = rows
        .map(|row| row.map_err(map_sqlite_err)?.into_contact())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contacts)
}

fn select_one(conn: &Connection, id: ContactId) -> Result<Contact, StoreError> {
    select(conn, Some(&ContactFilter::IdIn([id].into())))?
        .into_iter()
        .next()
        .ok_or(StoreError::NotFound(id))
}

/// SQLite-backed contact store.
///
/// The connection is owned by the store and released by [`ContactStore::close`]
/// (or on drop).
pub struct SqliteContactStore {
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for SqliteContactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteContactStore").finish_non_exhaustive()
    }
}

impl SqliteContactStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        conn.busy_timeout(busy_timeout).map_err(map_sqlite_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(map_sqlite_err)?;
        let store = Self::bootstrap(conn, busy_timeout)?;
        info!("Opened contact database at {}", path.display());
        Ok(store)
    }

    /// A private in-memory database, gone when the store is closed.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
        Self::bootstrap(conn, Duration::ZERO)
    }

    fn bootstrap(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout).map_err(map_sqlite_err)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite_err)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock: sqlite.conn".to_string()))?;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }
}

struct SqliteTransaction<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl ContactTransaction for SqliteTransaction<'_> {
    fn find(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>, StoreError> {
        select(self.tx, Some(filter))
    }

    fn create(&mut self, contact: NewContact) -> Result<Contact, StoreError> {
        let now = Utc::now();
        let linked_id = contact.linked_id.map(to_sql_id).transpose()?;
        self.tx
            .execute(
                "INSERT INTO contacts (phone_number, email, linked_id, link_precedence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    contact.phone_number,
                    contact.email,
                    linked_id,
                    contact.link_precedence.as_str(),
                    now,
                ],
            )
            .map_err(map_sqlite_err)?;
        let row_id = self.tx.last_insert_rowid();
        Ok(Contact {
            id: from_sql_id(row_id, row_id)?,
            email: contact.email,
            phone_number: contact.phone_number,
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    fn update_by_id(&mut self, id: ContactId, patch: LinkPatch) -> Result<Contact, StoreError> {
        let linked_id = patch.linked_id.map(to_sql_id).transpose()?;
        let changed = self
            .tx
            .execute(
                "UPDATE contacts SET link_precedence = ?1, linked_id = ?2, updated_at = ?3 WHERE id = ?4",
                params![patch.link_precedence.as_str(), linked_id, Utc::now(), to_sql_id(id)?],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        select_one(self.tx, id)
    }
}

impl ContactStore for SqliteContactStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn transaction(&self, work: &mut TransactionWork<'_>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite_err)?;
            {
                let mut scope = SqliteTransaction { tx: &tx };
                // Dropping `tx` on error rolls the unit back.
                work(&mut scope)?;
            }
            tx.commit().map_err(map_sqlite_err)
        })
    }

    fn all_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        self.with_conn(|conn| select(conn, None))
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock: sqlite.conn".to_string()))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| map_sqlite_err(e))?;
            debug!("Closed contact database");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::in_transaction;
    use identilink_core::Observation;
    use std::collections::BTreeSet;

    fn observation(email: Option<&str>, phone: Option<&str>) -> Observation {
        Observation::new(email.map(String::from), phone.map(String::from)).unwrap()
    }

    #[test]
    fn where_clause_renders_nested_or() {
        let mut values = Vec::new();
        let filter = ContactFilter::Any(vec![
            ContactFilter::Email("a@x.com".into()),
            ContactFilter::members_of(BTreeSet::from([ContactId::new(1), ContactId::new(2)])),
        ]);
        let sql = where_clause(&filter, &mut values).unwrap();
        assert_eq!(sql, "(email = ? OR (id IN (?, ?) OR linked_id IN (?, ?)))");
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn empty_filters_match_nothing() {
        let mut values = Vec::new();
        assert_eq!(where_clause(&ContactFilter::Any(vec![]), &mut values).unwrap(), "0");
        assert_eq!(
            where_clause(&ContactFilter::IdIn(BTreeSet::new()), &mut values).unwrap(),
            "0"
        );
        assert!(values.is_empty());
    }

    #[test]
    fn create_find_update_roundtrip() {
        let store = SqliteContactStore::in_memory().unwrap();
        let a = store.create(NewContact::primary(&observation(Some("a@x.com"), None))).unwrap();
        let b = store.create(NewContact::primary(&observation(None, Some("123")))).unwrap();
        assert_eq!(a.id, ContactId::new(1));
        assert_eq!(b.id, ContactId::new(2));

        let updated = store.update_by_id(b.id, LinkPatch::link_to(a.id)).unwrap();
        assert_eq!(updated.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(updated.linked_id, Some(a.id));
        assert_eq!(updated.created_at, b.created_at);

        let cluster = store.find(&ContactFilter::rooted_at(a.id)).unwrap();
        assert_eq!(cluster.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    }

    #[test]
    fn failed_unit_rolls_back() {
        let store = SqliteContactStore::in_memory().unwrap();
        let result = in_transaction(&store, |tx| {
            tx.create(NewContact::primary(&observation(Some("a@x.com"), None)))?;
            Err::<(), _>(StoreError::Timeout(Duration::from_millis(1)))
        });
        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(store.all_contacts().unwrap().is_empty());
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = SqliteContactStore::in_memory().unwrap();
        let err = store
            .update_by_id(ContactId::new(5), LinkPatch::link_to(ContactId::new(1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn close_then_use_is_closed() {
        let store = SqliteContactStore::in_memory().unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.all_contacts(), Err(StoreError::Closed)));
    }
}
