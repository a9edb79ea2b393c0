//! Canonical encoding of a parameter set.
//!
//! The signature is computed over a single string built from every request
//! parameter except the signature itself:
//!
//! ```text
//! name1=value1a&name1=value1b&name2=value2
//! ```
//!
//! Names are sorted byte-wise, the values of each name are sorted byte-wise,
//! and both are query-escaped byte by byte. Two parameter sets holding the
//! same pairs always encode to the same string regardless of arrival order.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_encode};

use crate::params::{ParameterSet, SIGN_FIELD};

/// Bytes that are escaped in a query component.
///
/// Everything except the unreserved characters (A-Z, a-z, 0-9, `-`, `_`, `.`,
/// `~`) is percent-encoded. Spaces are encoded here and then rewritten to `+`.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a parameter set into its canonical signing string.
///
/// The `api_sign` field is skipped. An empty set (or one holding only the
/// signature) encodes to the empty string.
///
/// # Examples
///
/// ```
/// use apisign_auth::canonical::encode_values;
/// use apisign_auth::params::ParameterSet;
///
/// let params = ParameterSet::from_query("b=2&a=y&a=x&api_sign=abc");
/// assert_eq!(encode_values(&params), "a=x&a=y&b=2");
/// ```
#[must_use]
pub fn encode_values(params: &ParameterSet) -> String {
    let mut out = String::new();

    // ParameterSet iterates names in byte-wise order already.
    for (name, values) in params.iter() {
        if name == SIGN_FIELD.as_bytes() {
            continue;
        }

        let mut sorted: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
        sorted.sort_unstable();

        let prefix = query_escape_bytes(name);
        for value in sorted {
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(&prefix);
            out.push('=');
            out.push_str(&query_escape_bytes(value));
        }
    }

    out
}

/// Escape a single name or value for use in a query string.
///
/// # Examples
///
/// ```
/// use apisign_auth::canonical::query_escape;
///
/// assert_eq!(query_escape("a b/c"), "a+b%2Fc");
/// assert_eq!(query_escape("x-y_z.~"), "x-y_z.~");
/// ```
#[must_use]
pub fn query_escape(input: &str) -> String {
    query_escape_bytes(input.as_bytes())
}

/// Escape raw bytes the same way. Bytes that are not UTF-8 are escaped one
/// by one, e.g. `0xFF` becomes `%FF`.
#[must_use]
pub fn query_escape_bytes(input: &[u8]) -> String {
    // A literal '%' is always escaped to %25, so every "%20" here came from a space.
    percent_encode(input, QUERY_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_encode_empty_set_as_empty_string() {
        assert_eq!(encode_values(&ParameterSet::new()), "");
    }

    #[test]
    fn test_should_encode_set_with_only_signature_as_empty_string() {
        let params = ParameterSet::from_query("api_sign=deadbeef");
        assert_eq!(encode_values(&params), "");
    }

    #[test]
    fn test_should_sort_names_and_values() {
        let params: ParameterSet = [("z", "1"), ("a", "c"), ("a", "b"), ("m", "")]
            .into_iter()
            .collect();
        assert_eq!(encode_values(&params), "a=b&a=c&m=&z=1");
    }

    #[test]
    fn test_should_be_independent_of_insertion_order() {
        let first: ParameterSet = [("b", "2"), ("a", "1"), ("a", "0"), ("c", "3")]
            .into_iter()
            .collect();
        let second: ParameterSet = [("c", "3"), ("a", "0"), ("b", "2"), ("a", "1")]
            .into_iter()
            .collect();
        assert_eq!(encode_values(&first), encode_values(&second));
    }

    #[test]
    fn test_should_exclude_signature_field() {
        let with_sign = ParameterSet::from_query("a=1&api_sign=ffff&b=2");
        let without_sign = ParameterSet::from_query("a=1&b=2");
        assert_eq!(encode_values(&with_sign), encode_values(&without_sign));
    }

    #[test]
    fn test_should_escape_like_a_url_query() {
        let mut params = ParameterSet::new();
        params.append("a b", "x/y~*");
        params.append("k", "中");
        params.append("pct", "100%");
        assert_eq!(
            encode_values(&params),
            "a+b=x%2Fy~%2A&k=%E4%B8%AD&pct=100%25"
        );
    }

    #[test]
    fn test_should_escape_non_utf8_bytes_individually() {
        assert_eq!(encode_values(&ParameterSet::from_query("v=%FF")), "v=%FF");
        assert_eq!(encode_values(&ParameterSet::from_query("v=%FE")), "v=%FE");
        // "中" in GBK.
        assert_eq!(
            encode_values(&ParameterSet::from_query("k=%D6%D0")),
            "k=%D6%D0"
        );
    }

    #[test]
    fn test_should_sort_raw_byte_values() {
        let params = ParameterSet::from_query("v=%FF&v=a&v=%C3%A9");
        assert_eq!(encode_values(&params), "v=a&v=%C3%A9&v=%FF");
    }

    #[test]
    fn test_should_not_confuse_literal_percent_twenty_with_space() {
        assert_eq!(query_escape("%20"), "%2520");
        assert_eq!(query_escape(" "), "+");
    }

    #[test]
    fn test_should_encode_reference_parameters() {
        let params: ParameterSet = [
            ("api_action", "Status.Overview"),
            ("api_agent_app", "sysinfo"),
            ("api_format", "json"),
            ("api_lang", "zh_cn"),
            ("api_timestamp", "1515502060"),
            ("api_nonce", "8YyjYz9t6H3ZVraY"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            encode_values(&params),
            "api_action=Status.Overview&api_agent_app=sysinfo&api_format=json\
             &api_lang=zh_cn&api_nonce=8YyjYz9t6H3ZVraY&api_timestamp=1515502060"
        );
    }
}
