//! Application registry lookup.
//!
//! The gate never talks to a database directly. It asks an [`AppRepository`]
//! for at most one row matching an application id and reads the signing key
//! and status from it. Implementations may be backed by SQL, a config file or,
//! for tests, the [`InMemoryAppRepository`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

/// A typed application identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AppId {
    /// Integer id (for `app_id_type = "int"`).
    Int(i64),
    /// String id (for `app_id_type = "string"`).
    Str(String),
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(id) => f.write_str(id),
        }
    }
}

/// Where in the registry to look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLookup {
    /// Table holding one row per application.
    pub table: String,
    /// Column matched against the application id.
    pub id_column: String,
    /// Column holding the signing key.
    pub key_column: String,
    /// Column holding the status, or empty when there is none.
    pub status_column: String,
}

/// The key and status of one application.
#[derive(Clone, PartialEq, Eq)]
pub struct AppRecord {
    /// Signing key. A NULL key column reads as the empty string.
    pub sign_key: String,
    /// Status value, if the row has one.
    pub status: Option<String>,
}

impl AppRecord {
    /// Status value of an application in good standing.
    pub const NORMAL_STATUS: &str = "normal";

    /// Create a record with a `normal` status.
    #[must_use]
    pub fn normal(sign_key: impl Into<String>) -> Self {
        Self {
            sign_key: sign_key.into(),
            status: Some(Self::NORMAL_STATUS.to_owned()),
        }
    }

    /// Create a record with the given status.
    #[must_use]
    pub fn with_status(sign_key: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            sign_key: sign_key.into(),
            status: Some(status.into()),
        }
    }

    /// Whether the application may sign requests. A missing status passes.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|status| status == Self::NORMAL_STATUS)
    }
}

impl fmt::Debug for AppRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRecord")
            .field("sign_key", &"***")
            .field("status", &self.status)
            .finish()
    }
}

/// Errors raised by a registry backend.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The backend is unreachable or rejected the query.
    #[error("app registry query failed: {0}")]
    Query(String),

    /// SQLite driver failure.
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Read-only access to the application registry.
pub trait AppRepository: Send + Sync {
    /// Find the application with the given id.
    ///
    /// Returns `Ok(None)` when no row matches.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the lookup itself fails.
    fn find_app_by_id(
        &self,
        lookup: &AppLookup,
        id: &AppId,
    ) -> Result<Option<AppRecord>, RepositoryError>;
}

/// In-memory registry keyed by application id.
///
/// The table and column names of the lookup are ignored. Suitable for tests
/// and development servers.
///
/// # Examples
///
/// ```
/// use apisign_core::repository::{
///     AppId, AppLookup, AppRecord, AppRepository, InMemoryAppRepository,
/// };
///
/// let repo = InMemoryAppRepository::new([(AppId::Int(7), AppRecord::normal("k"))]);
/// let lookup = AppLookup {
///     table: "app".into(),
///     id_column: "app_id".into(),
///     key_column: "sign_key".into(),
///     status_column: "status".into(),
/// };
/// let record = repo.find_app_by_id(&lookup, &AppId::Int(7)).unwrap().unwrap();
/// assert_eq!(record.sign_key, "k");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAppRepository {
    apps: RwLock<HashMap<AppId, AppRecord>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryAppRepository {
    /// Create a registry from (id, record) pairs.
    pub fn new(apps: impl IntoIterator<Item = (AppId, AppRecord)>) -> Self {
        Self {
            apps: RwLock::new(apps.into_iter().collect()),
            lookups: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert or replace an application.
    pub fn insert(&self, id: AppId, record: AppRecord) {
        self.apps.write().insert(id, record);
    }

    /// Remove an application.
    pub fn remove(&self, id: &AppId) -> Option<AppRecord> {
        self.apps.write().remove(id)
    }

    /// Make every subsequent lookup fail, simulating a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Acquire)
    }
}

impl AppRepository for InMemoryAppRepository {
    fn find_app_by_id(
        &self,
        _lookup: &AppLookup,
        id: &AppId,
    ) -> Result<Option<AppRecord>, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::AcqRel);
        if self.unavailable.load(Ordering::Acquire) {
            return Err(RepositoryError::Query("registry unavailable".to_owned()));
        }
        Ok(self.apps.read().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> AppLookup {
        AppLookup {
            table: "app".to_owned(),
            id_column: "app_id".to_owned(),
            key_column: "sign_key".to_owned(),
            status_column: "status".to_owned(),
        }
    }

    #[test]
    fn test_should_find_inserted_app() {
        let repo = InMemoryAppRepository::default();
        repo.insert(AppId::Str("web".to_owned()), AppRecord::normal("k1"));

        let record = repo
            .find_app_by_id(&lookup(), &AppId::Str("web".to_owned()))
            .unwrap();
        assert_eq!(record, Some(AppRecord::normal("k1")));
        assert_eq!(repo.lookup_count(), 1);
    }

    #[test]
    fn test_should_distinguish_int_and_string_ids() {
        let repo = InMemoryAppRepository::new([(AppId::Int(1), AppRecord::normal("k"))]);
        let result = repo
            .find_app_by_id(&lookup(), &AppId::Str("1".to_owned()))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_should_fail_when_unavailable() {
        let repo = InMemoryAppRepository::new([(AppId::Int(1), AppRecord::normal("k"))]);
        repo.set_unavailable(true);
        let result = repo.find_app_by_id(&lookup(), &AppId::Int(1));
        assert!(matches!(result, Err(RepositoryError::Query(_))));
    }

    #[test]
    fn test_should_remove_app() {
        let repo = InMemoryAppRepository::new([(AppId::Int(1), AppRecord::normal("k"))]);
        assert!(repo.remove(&AppId::Int(1)).is_some());
        assert!(repo.find_app_by_id(&lookup(), &AppId::Int(1)).unwrap().is_none());
    }

    #[test]
    fn test_should_treat_missing_status_as_normal() {
        let record = AppRecord {
            sign_key: "k".to_owned(),
            status: None,
        };
        assert!(record.is_normal());
        assert!(AppRecord::normal("k").is_normal());
        assert!(!AppRecord::with_status("k", "disabled").is_normal());
    }

    #[test]
    fn test_should_not_print_key_in_debug_output() {
        let debug = format!("{:?}", AppRecord::normal("very-secret"));
        assert!(!debug.contains("very-secret"));
    }
}
