//! Multi-valued request parameters.
//!
//! A [`ParameterSet`] is the view of an API request that the signature covers:
//! every query and form field, keyed by name, each with one or more values in
//! the order they arrived.
//!
//! Names and values are kept as the raw bytes their percent escapes decode to.
//! Nothing is forced through UTF-8, so `v=%FF` and `v=%FE` stay distinct and
//! re-encode to exactly what the client signed.

use std::collections::BTreeMap;

use percent_encoding::percent_decode;

/// Field carrying the caller's application identifier.
pub const APP_ID_FIELD: &str = "api_appid";

/// Field carrying the request timestamp in decimal Unix seconds.
pub const TIMESTAMP_FIELD: &str = "api_timestamp";

/// Field carrying the hex-encoded request signature.
pub const SIGN_FIELD: &str = "api_sign";

/// Field carrying the logical action name.
pub const ACTION_FIELD: &str = "api_action";

/// A mapping from parameter name to its ordered values.
///
/// # Examples
///
/// ```
/// use apisign_auth::params::ParameterSet;
///
/// let params = ParameterSet::from_query("tag=b&tag=a&name=x+y&raw=%FF");
/// assert_eq!(params.get("name"), Some("x y"));
/// assert_eq!(params.get_all("tag"), [b"b", b"a"]);
/// assert_eq!(params.get("raw"), None);
/// assert_eq!(params.get_bytes("raw"), Some(&b"\xff"[..]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: BTreeMap<Vec<u8>, Vec<Vec<u8>>>,
}

impl ParameterSet {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` string (a URL query or a
    /// form body). `+` decodes to a space and percent escapes are decoded.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::new();
        params.extend_from_bytes(query.as_bytes());
        params
    }

    /// Append the fields of an urlencoded string to this set.
    pub fn extend_from_query(&mut self, query: &str) {
        self.extend_from_bytes(query.as_bytes());
    }

    /// Append the fields of an urlencoded byte string, such as a form body,
    /// to this set. Bytes that are not UTF-8 are kept as they are.
    pub fn extend_from_bytes(&mut self, input: &[u8]) {
        for pair in input.split(|&b| b == b'&').filter(|p| !p.is_empty()) {
            let (name, value) = match pair.iter().position(|&b| b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &[][..]),
            };
            self.append(decode_component(name), decode_component(value));
        }
    }

    /// Append a value to the given name, keeping any existing values.
    pub fn append(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.values.entry(name.into()).or_default().push(value.into());
    }

    /// Replace all values of the given name with a single value.
    pub fn set(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.values.insert(name.into(), vec![value.into()]);
    }

    /// Remove a name and all of its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<Vec<u8>>> {
        self.values.remove(name.as_bytes())
    }

    /// First value of the given name, as raw bytes.
    ///
    /// An empty first value is reported as absent, so `?api_sign=` behaves the
    /// same as a request with no `api_sign` at all.
    #[must_use]
    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.values
            .get(name.as_bytes())
            .and_then(|vs| vs.first())
            .map(Vec::as_slice)
            .filter(|v| !v.is_empty())
    }

    /// First value of the given name, if it is present, non-empty and UTF-8.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_bytes(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// All values of the given name, in arrival order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[Vec<u8>] {
        self.values
            .get(name.as_bytes())
            .map_or(&[], Vec::as_slice)
    }

    /// Whether the set holds the given name (with any value, even empty).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name.as_bytes())
    }

    /// Iterate names in byte-wise order together with their values.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[Vec<u8>])> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set has no names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterSet
where
    K: Into<Vec<u8>>,
    V: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.append(k, v);
        }
        params
    }
}

/// Decode one urlencoded name or value: `+` to space, then percent escapes.
fn decode_component(input: &[u8]) -> Vec<u8> {
    let spaced: Vec<u8> = input
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&spaced).collect()
}
