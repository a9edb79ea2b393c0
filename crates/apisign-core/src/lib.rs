//! Request verification gate for apisign.
//!
//! This crate wires the signing primitives from [`apisign_auth`] into the
//! decision a server makes for every inbound API request: pass it through,
//! or reject it with a specific [`SignError`](apisign_auth::SignError).
//!
//! - [`config`] - Signing configuration loaded from `APISIGN_*` variables
//! - [`repository`] - Application registry lookup (`find_app_by_id`)
//! - [`resolver`] - Per-caller signing key resolution
//! - [`gate`] - The verification state machine

pub mod config;
pub mod error;
pub mod gate;
pub mod repository;
pub mod resolver;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use config::{AppConfig, AppIdType, SignConfig};
pub use error::ConfigError;
pub use gate::{BypassReason, SignGate, Verdict};
pub use repository::{
    AppId, AppLookup, AppRecord, AppRepository, InMemoryAppRepository, RepositoryError,
};
pub use resolver::{KeyResolver, ResolvedKey};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAppRepository;
