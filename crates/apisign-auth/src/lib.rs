//! Request signing primitives for apisign.
//!
//! This crate holds the pieces of API request authentication that do not need
//! any I/O: the multi-valued [`ParameterSet`], the canonical encoding that gets
//! signed, the HMAC-MD5 signer/verifier, the glob-based [`ActionMatcher`] and
//! the [`SignError`] taxonomy reported to callers.
//!
//! # Usage
//!
//! ```rust
//! use apisign_auth::params::ParameterSet;
//! use apisign_auth::signer::{check_sign, make_sign_string};
//!
//! let params = ParameterSet::from_query("api_action=Status.Overview&api_timestamp=1515502060");
//! let sign = make_sign_string(&params, "secret");
//! assert!(check_sign(&params, "secret", &sign));
//! ```
//!
//! # Modules
//!
//! - [`canonical`] - Deterministic encoding of a parameter set
//! - [`error`] - Verification error taxonomy
//! - [`matcher`] - Whitelist/blacklist action matching
//! - [`params`] - Multi-valued request parameters
//! - [`signer`] - HMAC signing and constant-time verification

pub mod canonical;
pub mod error;
pub mod matcher;
pub mod params;
pub mod signer;

pub use canonical::encode_values;
pub use error::SignError;
pub use matcher::{ActionMatcher, MatcherError};
pub use params::ParameterSet;
pub use signer::{check_sign, make_sign, make_sign_string};
