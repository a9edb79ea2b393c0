//! Error types for request signature verification.
//!
//! Every rejected request maps to exactly one [`SignError`] variant. The
//! [`SignError::code`] string is the stable, machine-readable identifier sent
//! back to the caller; the `Display` text is the default English message.

/// Reasons a request fails signature verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// The application does not exist.
    ///
    /// Not produced by the app registry lookup, which reports
    /// [`SignError::SignatureMismatch`] instead so unauthenticated callers
    /// cannot discover which application ids exist.
    #[error("Application does not exist!")]
    AppNotExist,

    /// The request carries no `api_sign` field.
    #[error("Missing signature!")]
    MissingSign,

    /// The signature does not match, or the application could not be found.
    #[error("Signature check failed!")]
    SignatureMismatch,

    /// The timestamp is older than the expiry window.
    #[error("Request has expired!")]
    SignExpired,

    /// The request carries no `api_timestamp` field.
    #[error("Missing timestamp!")]
    MissingTimestamp,

    /// The timestamp is not a decimal integer or lies too far in the future.
    #[error("Timestamp is invalid!")]
    InvalidTimestamp,

    /// Per-application keys are enabled but the request carries no `api_appid`.
    #[error("Missing app id!")]
    MissingAppId,

    /// The `api_appid` value cannot be converted to the configured id type.
    #[error("App id is invalid!")]
    InvalidAppId,

    /// The application exists but its status is not `normal`.
    #[error("App status error!")]
    AppStatusError,

    /// The key lookup failed for reasons unrelated to the request.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignError {
    /// Returns the machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AppNotExist => "AppNotExist",
            Self::MissingSign => "MissingSign",
            Self::SignatureMismatch => "SignError",
            Self::SignExpired => "SignExpired",
            Self::MissingTimestamp => "MissingTimestamp",
            Self::InvalidTimestamp => "InvalidTimestamp",
            Self::MissingAppId => "MissingAppId",
            Self::InvalidAppId => "InvalidAppId",
            Self::AppStatusError => "AppStatusError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Returns the HTTP status code used when rendering this error.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            Self::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingSign
            | Self::MissingTimestamp
            | Self::InvalidTimestamp
            | Self::MissingAppId
            | Self::InvalidAppId => http::StatusCode::BAD_REQUEST,
            Self::AppNotExist
            | Self::SignatureMismatch
            | Self::SignExpired
            | Self::AppStatusError => http::StatusCode::UNAUTHORIZED,
        }
    }

    /// Whether this error reflects a server-side fault rather than a bad request.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
