//! SQLite-backed application registry.
//!
//! Issues a single parameterized query per lookup:
//!
//! ```text
//! SELECT "<key>", "<status>" FROM "<table>" WHERE "<id>" = ?1 LIMIT 1
//! ```
//!
//! Table and column names come from configuration and are quoted as SQL
//! identifiers. The id is always bound as a parameter.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::repository::{AppId, AppLookup, AppRecord, AppRepository, RepositoryError};

/// Application registry stored in a SQLite database.
#[derive(Debug)]
pub struct SqliteAppRepository {
    conn: Mutex<Connection>,
}

impl SqliteAppRepository {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Sqlite`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Sqlite`] if SQLite fails to initialize.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an existing connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run a closure against the underlying connection, e.g. to seed a schema.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        f(&self.conn.lock())
    }
}

impl AppRepository for SqliteAppRepository {
    fn find_app_by_id(
        &self,
        lookup: &AppLookup,
        id: &AppId,
    ) -> Result<Option<AppRecord>, RepositoryError> {
        let has_status = !lookup.status_column.is_empty();
        let sql = build_select(lookup);
        let value = match id {
            AppId::Int(v) => Value::Integer(*v),
            AppId::Str(v) => Value::Text(v.clone()),
        };

        debug!(table = %lookup.table, app_id = %id, "Querying app registry");

        let conn = self.conn.lock();
        let record = conn
            .query_row(&sql, params![value], |row| {
                let sign_key = value_to_text(row.get(0)?);
                let status = if has_status {
                    value_to_text(row.get(1)?)
                } else {
                    None
                };
                Ok(AppRecord {
                    sign_key: sign_key.unwrap_or_default(),
                    status,
                })
            })
            .optional()?;

        Ok(record)
    }
}

/// Read a column of any storage class as text. NULL reads as `None`.
fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Text(v) => Some(v),
        Value::Blob(v) => Some(String::from_utf8_lossy(&v).into_owned()),
    }
}

/// Build the lookup statement for the configured table and columns.
fn build_select(lookup: &AppLookup) -> String {
    let key = quote_ident(&lookup.key_column);
    let table = quote_ident(&lookup.table);
    let id = quote_ident(&lookup.id_column);

    if lookup.status_column.is_empty() {
        format!("SELECT {key} FROM {table} WHERE {id} = ?1 LIMIT 1")
    } else {
        let status = quote_ident(&lookup.status_column);
        format!("SELECT {key}, {status} FROM {table} WHERE {id} = ?1 LIMIT 1")
    }
}

/// Quote a SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
