//! Signing key resolution.
//!
//! Decides which key a request must be signed with:
//!
//! 1. Per-application keys disabled: the static key (possibly empty).
//! 2. No `api_appid`: [`SignError::MissingAppId`].
//! 3. Admin shortcut id: the configured admin key, without a lookup.
//! 4. Otherwise the id is typed, looked up, and status-checked.
//!
//! An unknown application is reported as [`SignError::SignatureMismatch`], the
//! same outcome as a bad signature, so the response does not reveal whether an
//! id exists.

use std::sync::Arc;

use apisign_auth::SignError;
use tracing::{debug, error};

use crate::config::{AppConfig, AppIdType, SignConfig};
use crate::repository::{AppId, AppLookup, AppRepository};

/// The outcome of a successful key resolution.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    /// Key the request must be signed with. Empty disables the check.
    pub key: String,
    /// Application the key belongs to, when per-application keys are enabled.
    pub app_id: Option<String>,
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("key", &if self.key.is_empty() { "" } else { "***" })
            .field("app_id", &self.app_id)
            .finish()
    }
}

/// Resolves signing keys from configuration and the app registry.
#[derive(Clone)]
pub struct KeyResolver {
    repository: Option<Arc<dyn AppRepository>>,
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("repository", &self.repository.as_ref().map(|_| "..."))
            .finish()
    }
}

impl KeyResolver {
    /// Create a resolver. `repository` is only consulted when per-application
    /// keys are enabled.
    #[must_use]
    pub fn new(repository: Option<Arc<dyn AppRepository>>) -> Self {
        Self { repository }
    }

    /// Resolve the signing key for a request.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::MissingAppId`], [`SignError::InvalidAppId`],
    /// [`SignError::SignatureMismatch`] (unknown app),
    /// [`SignError::AppStatusError`] or [`SignError::Internal`] (lookup failure).
    pub fn resolve(
        &self,
        config: &SignConfig,
        app_id: Option<&str>,
    ) -> Result<ResolvedKey, SignError> {
        let app = &config.app;
        if !app.enabled {
            return Ok(ResolvedKey {
                key: config.sign_key.clone(),
                app_id: None,
            });
        }

        let app_id = app_id.ok_or(SignError::MissingAppId)?;

        if app.admin_app_enabled && app_id == app.admin_app_id {
            debug!(app_id, "Using admin app signing key");
            return Ok(ResolvedKey {
                key: app.admin_sign_key.clone(),
                app_id: Some(app_id.to_owned()),
            });
        }

        let typed_id = parse_app_id(app_id, app.app_id_type)?;
        let repository = self.repository.as_ref().ok_or_else(|| {
            error!("per-application signing enabled without an app repository");
            SignError::Internal("DBFailed".to_owned())
        })?;

        let record = repository
            .find_app_by_id(&lookup_for(app), &typed_id)
            .map_err(|e| {
                error!(app_id, error = %e, "App registry lookup failed");
                SignError::Internal("DBFailed".to_owned())
            })?;

        let Some(record) = record else {
            debug!(app_id, "Unknown app id, reporting as signature failure");
            return Err(SignError::SignatureMismatch);
        };

        if !record.is_normal() {
            debug!(app_id, status = ?record.status, "App is not in normal status");
            return Err(SignError::AppStatusError);
        }

        Ok(ResolvedKey {
            key: record.sign_key,
            app_id: Some(app_id.to_owned()),
        })
    }
}

/// Convert the raw `api_appid` value to the configured id type.
fn parse_app_id(raw: &str, id_type: AppIdType) -> Result<AppId, SignError> {
    match id_type {
        AppIdType::Int => raw
            .parse::<i64>()
            .map(AppId::Int)
            .map_err(|_| SignError::InvalidAppId),
        AppIdType::String => Ok(AppId::Str(raw.to_owned())),
    }
}

fn lookup_for(app: &AppConfig) -> AppLookup {
    AppLookup {
        table: app.table.clone(),
        id_column: app.app_id_column.clone(),
        key_column: app.sign_key_column.clone(),
        status_column: app.app_status_column.clone(),
    }
}
