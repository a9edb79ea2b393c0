//! Configuration errors raised while building the verification gate.

use apisign_auth::MatcherError;

/// Errors that prevent a [`SignGate`](crate::gate::SignGate) from being built.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An action whitelist or blacklist pattern failed to compile.
    #[error(transparent)]
    InvalidPattern(#[from] MatcherError),

    /// Per-application keys are enabled but no registry was supplied.
    #[error("apisign.app.enabled is set but no app repository was configured")]
    MissingRepository,
}
