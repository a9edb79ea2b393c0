//! HMAC request signing and verification.
//!
//! ```text
//! signature = lowercase_hex(HMAC-MD5(key, encode_values(params)))
//! ```
//!
//! Verification recomputes the expected signature and compares it with the
//! candidate in constant time.

use hmac::{Hmac, KeyInit, Mac};
use md5::Md5;
use subtle::ConstantTimeEq;
use tracing::trace;

use crate::canonical::encode_values;
use crate::params::ParameterSet;

type HmacMd5 = Hmac<Md5>;

/// Compute the raw MAC of a parameter set under the given key.
///
/// The `api_sign` field, if present, is not part of the signed data.
#[must_use]
pub fn make_sign(params: &ParameterSet, key: &str) -> [u8; 16] {
    let canonical = encode_values(params);
    trace!(canonical, "Built canonical parameter string");
    hmac_md5(key.as_bytes(), canonical.as_bytes())
}

/// Compute the signature of a parameter set as a lowercase hex string.
///
/// # Examples
///
/// ```
/// use apisign_auth::params::ParameterSet;
/// use apisign_auth::signer::make_sign_string;
///
/// let sign = make_sign_string(&ParameterSet::new(), "secret");
/// assert_eq!(sign.len(), 32);
/// ```
#[must_use]
pub fn make_sign_string(params: &ParameterSet, key: &str) -> String {
    hex::encode(make_sign(params, key))
}

/// Check whether `candidate` is the signature of `params` under `key`.
///
/// The comparison runs in constant time over the hex strings, so uppercase
/// hex is rejected just like any other mismatch.
#[must_use]
pub fn check_sign(params: &ParameterSet, key: &str, candidate: impl AsRef<[u8]>) -> bool {
    let expected = make_sign_string(params, key);
    expected.as_bytes().ct_eq(candidate.as_ref()).into()
}

/// Compute HMAC-MD5 and return the raw bytes.
fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}
