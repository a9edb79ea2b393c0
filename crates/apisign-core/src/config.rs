//! Signing configuration.
//!
//! All configuration is driven by `APISIGN_*` environment variables. The same
//! structure can also be embedded in a larger serde-based configuration file.

use std::env;
use std::fmt;

use tracing::warn;

/// Default number of seconds a signed request stays valid.
pub const DEFAULT_EXPIRE_TIME: i64 = 600;

/// Default number of seconds a timestamp may run ahead of the server clock.
pub const DEFAULT_ALLOW_TIME_OFFSET: i64 = 300;

/// Type of the application identifier column in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AppIdType {
    /// Signed 64-bit integer ids.
    #[default]
    Int,
    /// Free-form string ids.
    String,
}

impl AppIdType {
    /// Parse a configuration value. Anything other than `string` means `int`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("string") {
            Self::String
        } else {
            Self::Int
        }
    }

    /// The configuration spelling of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::String => "string",
        }
    }
}

impl From<String> for AppIdType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<AppIdType> for String {
    fn from(value: AppIdType) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for AppIdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-application key resolution settings.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Resolve keys from the app registry instead of the static key.
    pub enabled: bool,
    /// Registry table name.
    pub table: String,
    /// Column holding the application id.
    pub app_id_column: String,
    /// Type of the application id column.
    pub app_id_type: AppIdType,
    /// Column holding the application's signing key.
    pub sign_key_column: String,
    /// Column holding the application's status. Empty disables the status check.
    pub app_status_column: String,
    /// Whether the admin shortcut id is honoured.
    pub admin_app_enabled: bool,
    /// Reserved application id whose key comes from configuration.
    pub admin_app_id: String,
    /// Signing key of the admin application.
    pub admin_sign_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table: "app".to_owned(),
            app_id_column: "app_id".to_owned(),
            app_id_type: AppIdType::Int,
            sign_key_column: "sign_key".to_owned(),
            app_status_column: "status".to_owned(),
            admin_app_enabled: false,
            admin_app_id: "admin".to_owned(),
            admin_sign_key: String::new(),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("enabled", &self.enabled)
            .field("table", &self.table)
            .field("app_id_column", &self.app_id_column)
            .field("app_id_type", &self.app_id_type)
            .field("sign_key_column", &self.sign_key_column)
            .field("app_status_column", &self.app_status_column)
            .field("admin_app_enabled", &self.admin_app_enabled)
            .field("admin_app_id", &self.admin_app_id)
            .field("admin_sign_key", &redact(&self.admin_sign_key))
            .finish()
    }
}

/// Action patterns deciding which requests must be signed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ActionRules {
    /// Glob patterns of enforced actions.
    pub whitelist: Vec<String>,
    /// Glob patterns of exempt actions. Takes precedence over the whitelist.
    pub blacklist: Vec<String>,
}

impl Default for ActionRules {
    fn default() -> Self {
        Self {
            whitelist: vec!["*".to_owned()],
            blacklist: Vec::new(),
        }
    }
}

/// Complete signing configuration.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SignConfig {
    /// Turn the gate off entirely.
    pub disabled: bool,
    /// Static signing key. Empty means static signing is off.
    pub sign_key: String,
    /// Seconds after its timestamp that a request expires.
    pub expire_time: i64,
    /// Seconds a timestamp may lie in the future.
    pub allow_time_offset: i64,
    /// Enforced and exempt actions.
    pub actions: ActionRules,
    /// Per-application key resolution.
    pub app: AppConfig,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            sign_key: String::new(),
            expire_time: DEFAULT_EXPIRE_TIME,
            allow_time_offset: DEFAULT_ALLOW_TIME_OFFSET,
            actions: ActionRules::default(),
            app: AppConfig::default(),
        }
    }
}

impl fmt::Debug for SignConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignConfig")
            .field("disabled", &self.disabled)
            .field("sign_key", &redact(&self.sign_key))
            .field("expire_time", &self.expire_time)
            .field("allow_time_offset", &self.allow_time_offset)
            .field("actions", &self.actions)
            .field("app", &self.app)
            .finish()
    }
}

impl SignConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// Unset variables keep their defaults. Unparseable numbers are logged and
    /// ignored.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("APISIGN_DISABLED") {
            config.disabled = parse_bool(&v);
        }
        if let Some(v) = lookup("APISIGN_SIGN_KEY") {
            config.sign_key = v;
        }
        if let Some(v) = lookup("APISIGN_EXPIRE_TIME") {
            config.expire_time = parse_seconds("APISIGN_EXPIRE_TIME", &v, config.expire_time);
        }
        if let Some(v) = lookup("APISIGN_ALLOW_TIME_OFFSET") {
            config.allow_time_offset =
                parse_seconds("APISIGN_ALLOW_TIME_OFFSET", &v, config.allow_time_offset);
        }
        if let Some(v) = lookup("APISIGN_ACTIONS_WHITELIST") {
            config.actions.whitelist = parse_list(&v);
        }
        if let Some(v) = lookup("APISIGN_ACTIONS_BLACKLIST") {
            config.actions.blacklist = parse_list(&v);
        }

        let app = &mut config.app;
        if let Some(v) = lookup("APISIGN_APP_ENABLED") {
            app.enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("APISIGN_APP_TABLE") {
            app.table = v;
        }
        if let Some(v) = lookup("APISIGN_APP_ID_COLUMN") {
            app.app_id_column = v;
        }
        if let Some(v) = lookup("APISIGN_APP_ID_TYPE") {
            app.app_id_type = AppIdType::parse(&v);
        }
        if let Some(v) = lookup("APISIGN_APP_SIGN_KEY_COLUMN") {
            app.sign_key_column = v;
        }
        if let Some(v) = lookup("APISIGN_APP_STATUS_COLUMN") {
            app.app_status_column = v;
        }
        if let Some(v) = lookup("APISIGN_APP_ADMIN_APP_ENABLED") {
            app.admin_app_enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("APISIGN_APP_ADMIN_APP_ID") {
            app.admin_app_id = v;
        }
        if let Some(v) = lookup("APISIGN_APP_ADMIN_SIGN_KEY") {
            app.admin_sign_key = v;
        }

        config
    }

    /// Whether any request can require a signature at all.
    #[must_use]
    pub fn signing_active(&self) -> bool {
        self.app.enabled || !self.sign_key.is_empty()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "TRUE" | "YES")
}

fn parse_seconds(key: &str, value: &str, default: i64) -> i64 {
    value.trim().parse().unwrap_or_else(|_| {
        warn!(key, value, default, "ignoring non-numeric setting");
        default
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "***" }
}
