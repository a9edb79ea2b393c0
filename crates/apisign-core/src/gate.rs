//! Request verification gate.
//!
//! [`SignGate::verify`] runs once per inbound request and short-circuits on
//! the first failing check:
//!
//! 1. Gate disabled: pass.
//! 2. No static key and per-application keys off: pass.
//! 3. Action not enforced by the whitelist/blacklist: pass.
//! 4. Resolve the signing key (may fail).
//! 5. Empty key: pass.
//! 6. `api_timestamp` present and numeric.
//! 7. Timestamp not more than `allow_time_offset` seconds ahead.
//! 8. Timestamp not more than `expire_time` seconds behind.
//! 9. `api_sign` present.
//! 10. Signature matches.
//!
//! A timestamp far in the past is only ever reported as expired; one too far
//! ahead is reported as invalid.
//!
//! # Concurrency
//!
//! The gate is shared across request tasks. Settings live in an immutable
//! [`SignConfig`] snapshot behind an `Arc`; [`SignGate::set_sign_key`] swaps in
//! a new snapshot and verifications that already hold the old one finish with
//! it. The enabled flag is a plain atomic.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use apisign_auth::matcher::ActionMatcher;
use apisign_auth::params::{ACTION_FIELD, APP_ID_FIELD, ParameterSet, SIGN_FIELD, TIMESTAMP_FIELD};
use apisign_auth::{SignError, check_sign};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::SignConfig;
use crate::error::ConfigError;
use crate::repository::AppRepository;
use crate::resolver::KeyResolver;

/// Why a request was forwarded without a signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// The gate is disabled.
    Disabled,
    /// Neither a static key nor per-application keys are configured.
    SigningOff,
    /// The action is not covered by the enforcement rules.
    ActionNotEnforced,
    /// The resolved key is empty.
    EmptyKey,
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "gate disabled",
            Self::SigningOff => "signing off",
            Self::ActionNotEnforced => "action not enforced",
            Self::EmptyKey => "empty signing key",
        })
    }
}

/// The result of a request that may proceed downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The request was let through without a signature check.
    Bypassed(BypassReason),
    /// The request carried a valid, fresh signature.
    Verified {
        /// Application that signed the request, when per-application keys are on.
        app_id: Option<String>,
    },
}

/// Signature verification gate.
///
/// # Examples
///
/// ```
/// use apisign_auth::params::ParameterSet;
/// use apisign_auth::signer::make_sign_string;
/// use apisign_core::{SignConfig, SignGate, Verdict};
///
/// let mut config = SignConfig::default();
/// config.sign_key = "secret".to_owned();
/// let gate = SignGate::new(config, None).unwrap();
///
/// let mut params = ParameterSet::from_query("api_action=User.Get&api_timestamp=1700000000");
/// let sign = make_sign_string(&params, "secret");
/// params.set("api_sign", sign);
///
/// let verdict = gate.verify_at(&params, 1_700_000_000).unwrap();
/// assert_eq!(verdict, Verdict::Verified { app_id: None });
/// ```
pub struct SignGate {
    enabled: AtomicBool,
    config: RwLock<Arc<SignConfig>>,
    matcher: ActionMatcher,
    resolver: KeyResolver,
}

impl fmt::Debug for SignGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignGate")
            .field("enabled", &self.is_enabled())
            .field("config", &self.snapshot())
            .field("matcher", &self.matcher)
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl SignGate {
    /// Build a gate from configuration.
    ///
    /// `repository` is required when `config.app.enabled` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for an uncompilable action
    /// pattern, or [`ConfigError::MissingRepository`] when per-application keys
    /// are enabled without a repository.
    pub fn new(
        config: SignConfig,
        repository: Option<Arc<dyn AppRepository>>,
    ) -> Result<Self, ConfigError> {
        if config.app.enabled && repository.is_none() {
            return Err(ConfigError::MissingRepository);
        }

        let matcher = ActionMatcher::new(&config.actions.whitelist, &config.actions.blacklist)?;

        Ok(Self {
            enabled: AtomicBool::new(!config.disabled),
            config: RwLock::new(Arc::new(config)),
            matcher,
            resolver: KeyResolver::new(repository),
        })
    }

    /// Verify a request against the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns the [`SignError`] describing the first failed check.
    pub fn verify(&self, params: &ParameterSet) -> Result<Verdict, SignError> {
        self.verify_at(params, Utc::now().timestamp())
    }

    /// Verify a request as if the current Unix time were `now`.
    ///
    /// # Errors
    ///
    /// Returns the [`SignError`] describing the first failed check.
    pub fn verify_at(&self, params: &ParameterSet, now: i64) -> Result<Verdict, SignError> {
        let action = params
            .get_bytes(ACTION_FIELD)
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        let action: &str = &action;
        let result = self.check(params, action, now);

        match &result {
            Ok(Verdict::Bypassed(reason)) => {
                debug!(action, %reason, "Signature check bypassed");
            }
            Ok(Verdict::Verified { app_id }) => {
                debug!(action, app_id = ?app_id, "Signature verified");
            }
            Err(err) => {
                warn!(
                    action,
                    app_id = params.get(APP_ID_FIELD),
                    code = err.code(),
                    "Request rejected"
                );
            }
        }

        result
    }

    fn check(&self, params: &ParameterSet, action: &str, now: i64) -> Result<Verdict, SignError> {
        if !self.is_enabled() {
            return Ok(Verdict::Bypassed(BypassReason::Disabled));
        }

        let config = self.snapshot();
        if !config.signing_active() {
            return Ok(Verdict::Bypassed(BypassReason::SigningOff));
        }

        if !self.matcher.matches(action) {
            return Ok(Verdict::Bypassed(BypassReason::ActionNotEnforced));
        }

        let app_id = match params.get_bytes(APP_ID_FIELD).map(std::str::from_utf8) {
            Some(Ok(app_id)) => Some(app_id),
            Some(Err(_)) if config.app.enabled => return Err(SignError::InvalidAppId),
            _ => None,
        };
        let resolved = self.resolver.resolve(&config, app_id)?;
        if resolved.key.is_empty() {
            return Ok(Verdict::Bypassed(BypassReason::EmptyKey));
        }

        check_timestamp(params, now, config.allow_time_offset, config.expire_time)?;

        let sign = params.get_bytes(SIGN_FIELD).ok_or(SignError::MissingSign)?;
        if !check_sign(params, &resolved.key, sign) {
            return Err(SignError::SignatureMismatch);
        }

        Ok(Verdict::Verified {
            app_id: resolved.app_id,
        })
    }

    /// The current static signing key.
    #[must_use]
    pub fn sign_key(&self) -> String {
        self.snapshot().sign_key.clone()
    }

    /// Replace the static signing key. Takes effect for verifications that
    /// start after this call returns.
    pub fn set_sign_key(&self, sign_key: impl Into<String>) {
        let sign_key = sign_key.into();
        let mut guard = self.config.write();
        let mut next = SignConfig::clone(&guard);
        next.sign_key = sign_key;
        *guard = Arc::new(next);
        debug!("Static signing key updated");
    }

    /// Turn the gate on.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Turn the gate off; every request passes through.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether the gate is enforcing signatures.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// The configuration snapshot new verifications will use.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SignConfig> {
        Arc::clone(&self.config.read())
    }
}

/// Check that `api_timestamp` is present, numeric, and inside the window.
fn check_timestamp(
    params: &ParameterSet,
    now: i64,
    allow_time_offset: i64,
    expire_time: i64,
) -> Result<(), SignError> {
    let raw = params
        .get_bytes(TIMESTAMP_FIELD)
        .ok_or(SignError::MissingTimestamp)?;
    let timestamp: i64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .ok_or(SignError::InvalidTimestamp)?;

    if timestamp.saturating_sub(now) > allow_time_offset {
        return Err(SignError::InvalidTimestamp);
    }
    if now.saturating_sub(timestamp) > expire_time {
        return Err(SignError::SignExpired);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use apisign_auth::make_sign_string;

    use super::*;
    use crate::repository::{AppId, AppRecord, InMemoryAppRepository};

    const NOW: i64 = 1_515_502_060;
    const KEY: &str = "95bAzsK4AuYbrEnFjfUGdku5CXz2yKJn";

    fn static_gate() -> SignGate {
        let mut config = SignConfig::default();
        config.sign_key = KEY.to_owned();
        SignGate::new(config, None).unwrap()
    }

    fn signed(pairs: &[(&str, &str)], key: &str) -> ParameterSet {
        let mut params: ParameterSet = pairs.iter().copied().collect();
        let sign = make_sign_string(&params, key);
        params.set(SIGN_FIELD, sign);
        params
    }

    fn request_at(timestamp: i64) -> ParameterSet {
        signed(
            &[
                ("api_action", "Status.Overview"),
                ("api_timestamp", timestamp.to_string().as_str()),
                ("api_nonce", "8YyjYz9t6H3ZVraY"),
            ],
            KEY,
        )
    }

    fn app_gate(repo: &Arc<InMemoryAppRepository>) -> SignGate {
        let mut config = SignConfig::default();
        config.app.enabled = true;
        config.app.admin_app_enabled = true;
        config.app.admin_sign_key = "admin-key".to_owned();
        SignGate::new(config, Some(Arc::clone(repo) as Arc<dyn AppRepository>)).unwrap()
    }

    #[test]
    fn test_should_verify_fresh_signed_request() {
        let verdict = static_gate().verify_at(&request_at(NOW), NOW).unwrap();
        assert_eq!(verdict, Verdict::Verified { app_id: None });
    }

    #[test]
    fn test_should_verify_with_wall_clock() {
        let params = request_at(Utc::now().timestamp());
        assert!(matches!(
            static_gate().verify(&params),
            Ok(Verdict::Verified { .. })
        ));
    }

    #[test]
    fn test_should_accept_timestamps_at_window_edges() {
        let gate = static_gate();
        assert!(gate.verify_at(&request_at(NOW - 600), NOW).is_ok());
        assert!(gate.verify_at(&request_at(NOW + 300), NOW).is_ok());
    }

    #[test]
    fn test_should_reject_expired_request() {
        let result = static_gate().verify_at(&request_at(NOW - 601), NOW);
        assert_eq!(result, Err(SignError::SignExpired));
    }

    #[test]
    fn test_should_reject_future_request_as_invalid() {
        let result = static_gate().verify_at(&request_at(NOW + 301), NOW);
        assert_eq!(result, Err(SignError::InvalidTimestamp));
    }

    #[test]
    fn test_should_report_far_past_as_expired_not_invalid() {
        let result = static_gate().verify_at(&request_at(0), NOW);
        assert_eq!(result, Err(SignError::SignExpired));
    }

    #[test]
    fn test_should_not_overflow_on_extreme_timestamps() {
        let gate = static_gate();
        assert_eq!(
            gate.verify_at(&request_at(i64::MIN), NOW),
            Err(SignError::SignExpired)
        );
        assert_eq!(
            gate.verify_at(&request_at(i64::MAX), NOW),
            Err(SignError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_should_reject_missing_timestamp() {
        let params = signed(&[("api_action", "Status.Overview")], KEY);
        let result = static_gate().verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::MissingTimestamp));
    }

    #[test]
    fn test_should_reject_non_numeric_timestamp() {
        let params = signed(&[("api_timestamp", "yesterday")], KEY);
        let result = static_gate().verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::InvalidTimestamp));
    }

    #[test]
    fn test_should_reject_non_utf8_timestamp_as_invalid() {
        let mut params = request_at(NOW);
        params.set(TIMESTAMP_FIELD, b"\xff".to_vec());
        let result = static_gate().verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::InvalidTimestamp));
    }

    #[test]
    fn test_should_cover_non_utf8_values_with_signature() {
        let mut params = ParameterSet::from_query("api_timestamp=1515502060&memo=%D6%D0");
        let sign = make_sign_string(&params, KEY);
        params.set(SIGN_FIELD, sign);
        assert!(static_gate().verify_at(&params, NOW).is_ok());

        params.set("memo", b"\xd6\xd1".to_vec());
        assert_eq!(
            static_gate().verify_at(&params, NOW),
            Err(SignError::SignatureMismatch)
        );
    }

    #[test]
    fn test_should_reject_missing_signature() {
        let mut params = request_at(NOW);
        params.remove(SIGN_FIELD);
        let result = static_gate().verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::MissingSign));
    }

    #[test]
    fn test_should_reject_wrong_signature() {
        let mut params = request_at(NOW);
        params.set(SIGN_FIELD, "0123456789abcdef0123456789abcdef");
        let result = static_gate().verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::SignatureMismatch));
    }

    #[test]
    fn test_should_reject_tampered_parameter() {
        let mut params = request_at(NOW);
        params.set("api_nonce", "replayed");
        let result = static_gate().verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::SignatureMismatch));
    }

    #[test]
    fn test_should_pass_everything_when_disabled() {
        let gate = static_gate();
        gate.disable();
        assert!(!gate.is_enabled());
        let verdict = gate.verify_at(&ParameterSet::new(), NOW).unwrap();
        assert_eq!(verdict, Verdict::Bypassed(BypassReason::Disabled));

        gate.enable();
        assert_eq!(
            gate.verify_at(&ParameterSet::new(), NOW),
            Err(SignError::MissingTimestamp)
        );
    }

    #[test]
    fn test_should_start_disabled_from_config() {
        let mut config = SignConfig::default();
        config.sign_key = KEY.to_owned();
        config.disabled = true;
        let gate = SignGate::new(config, None).unwrap();
        assert_eq!(
            gate.verify_at(&ParameterSet::new(), NOW),
            Ok(Verdict::Bypassed(BypassReason::Disabled))
        );
    }

    #[test]
    fn test_should_pass_everything_without_any_key() {
        let gate = SignGate::new(SignConfig::default(), None).unwrap();
        let verdict = gate.verify_at(&ParameterSet::new(), NOW).unwrap();
        assert_eq!(verdict, Verdict::Bypassed(BypassReason::SigningOff));
    }

    #[test]
    fn test_should_pass_actions_outside_enforcement_rules() {
        let mut config = SignConfig::default();
        config.sign_key = KEY.to_owned();
        config.actions.blacklist = vec!["Public.*".to_owned()];
        let gate = SignGate::new(config, None).unwrap();

        let params = ParameterSet::from_query("api_action=Public.Ping");
        assert_eq!(
            gate.verify_at(&params, NOW),
            Ok(Verdict::Bypassed(BypassReason::ActionNotEnforced))
        );

        let params = ParameterSet::from_query("api_action=Private.Ping");
        assert_eq!(
            gate.verify_at(&params, NOW),
            Err(SignError::MissingTimestamp)
        );
    }

    #[test]
    fn test_should_use_updated_sign_key() {
        let gate = static_gate();
        gate.set_sign_key("rotated");
        assert_eq!(gate.sign_key(), "rotated");
        assert_eq!(
            gate.verify_at(&request_at(NOW), NOW),
            Err(SignError::SignatureMismatch)
        );

        let params = signed(
            &[("api_action", "A"), ("api_timestamp", NOW.to_string().as_str())],
            "rotated",
        );
        assert!(gate.verify_at(&params, NOW).is_ok());
    }

    #[test]
    fn test_should_keep_old_snapshot_for_in_flight_verification() {
        let gate = static_gate();
        let before = gate.snapshot();
        gate.set_sign_key("rotated");
        assert_eq!(before.sign_key, KEY);
        assert_eq!(gate.snapshot().sign_key, "rotated");
    }

    #[test]
    fn test_should_pass_through_when_static_key_cleared() {
        let gate = static_gate();
        gate.set_sign_key("");
        assert_eq!(
            gate.verify_at(&ParameterSet::new(), NOW),
            Ok(Verdict::Bypassed(BypassReason::SigningOff))
        );
    }

    #[test]
    fn test_should_require_repository_for_app_mode() {
        let mut config = SignConfig::default();
        config.app.enabled = true;
        assert!(matches!(
            SignGate::new(config, None),
            Err(ConfigError::MissingRepository)
        ));
    }

    #[test]
    fn test_should_verify_with_app_key() {
        let repo = Arc::new(InMemoryAppRepository::new([(
            AppId::Int(1001),
            AppRecord::normal("app-key"),
        )]));
        let gate = app_gate(&repo);
        let params = signed(
            &[
                ("api_appid", "1001"),
                ("api_action", "Order.Create"),
                ("api_timestamp", NOW.to_string().as_str()),
            ],
            "app-key",
        );
        assert_eq!(
            gate.verify_at(&params, NOW),
            Ok(Verdict::Verified {
                app_id: Some("1001".to_owned())
            })
        );
    }

    #[test]
    fn test_should_reject_missing_app_id_before_timestamp_checks() {
        let repo = Arc::new(InMemoryAppRepository::default());
        let result = app_gate(&repo).verify_at(&ParameterSet::new(), NOW);
        assert_eq!(result, Err(SignError::MissingAppId));
    }

    #[test]
    fn test_should_reject_non_utf8_app_id() {
        let repo = Arc::new(InMemoryAppRepository::default());
        let params = ParameterSet::from_query("api_appid=%FF");
        let result = app_gate(&repo).verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::InvalidAppId));
        assert_eq!(repo.lookup_count(), 0);
    }

    #[test]
    fn test_should_report_unknown_app_as_sign_error() {
        let repo = Arc::new(InMemoryAppRepository::default());
        let params = signed(
            &[("api_appid", "404"), ("api_timestamp", NOW.to_string().as_str())],
            "anything",
        );
        let result = app_gate(&repo).verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::SignatureMismatch));
    }

    #[test]
    fn test_should_reject_app_with_abnormal_status() {
        let repo = Arc::new(InMemoryAppRepository::new([(
            AppId::Int(5),
            AppRecord::with_status("k", "banned"),
        )]));
        let params = signed(
            &[("api_appid", "5"), ("api_timestamp", NOW.to_string().as_str())],
            "k",
        );
        let result = app_gate(&repo).verify_at(&params, NOW);
        assert_eq!(result, Err(SignError::AppStatusError));
    }

    #[test]
    fn test_should_verify_admin_app_without_lookup() {
        let repo = Arc::new(InMemoryAppRepository::default());
        let gate = app_gate(&repo);
        let params = signed(
            &[("api_appid", "admin"), ("api_timestamp", NOW.to_string().as_str())],
            "admin-key",
        );
        assert_eq!(
            gate.verify_at(&params, NOW),
            Ok(Verdict::Verified {
                app_id: Some("admin".to_owned())
            })
        );
        assert_eq!(repo.lookup_count(), 0);
    }

    #[test]
    fn test_should_pass_app_with_empty_key() {
        let repo = Arc::new(InMemoryAppRepository::new([(
            AppId::Int(9),
            AppRecord::normal(""),
        )]));
        let params = ParameterSet::from_query("api_appid=9");
        assert_eq!(
            app_gate(&repo).verify_at(&params, NOW),
            Ok(Verdict::Bypassed(BypassReason::EmptyKey))
        );
    }

    #[test]
    fn test_should_surface_registry_outage_as_internal_error() {
        let repo = Arc::new(InMemoryAppRepository::default());
        repo.set_unavailable(true);
        let params = ParameterSet::from_query("api_appid=1");
        let result = app_gate(&repo).verify_at(&params, NOW);
        assert!(matches!(result, Err(SignError::Internal(_))));
    }

    #[test]
    fn test_should_verify_concurrently_while_key_rotates() {
        let gate = Arc::new(static_gate());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if i == 0 {
                            gate.set_sign_key(KEY);
                        }
                        assert!(gate.verify_at(&request_at(NOW), NOW).is_ok());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
