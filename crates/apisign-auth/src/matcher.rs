//! Whitelist/blacklist matching of action names.
//!
//! Patterns are shell-style globs: `*` matches any run of characters
//! (including none), `?` matches exactly one character, and everything else
//! matches itself. An action is enforced when it matches at least one
//! whitelist pattern and no blacklist pattern. The blacklist always wins.

use regex::Regex;

/// Error raised when a pattern cannot be compiled.
#[derive(Debug, thiserror::Error)]
#[error("invalid action pattern {pattern:?}: {source}")]
pub struct MatcherError {
    /// The offending glob pattern.
    pub pattern: String,
    /// The underlying regex compilation failure.
    #[source]
    pub source: regex::Error,
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    fn new(pattern: &str) -> Result<Self, MatcherError> {
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|source| MatcherError {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Decides which actions are subject to signature enforcement.
///
/// # Examples
///
/// ```
/// use apisign_auth::matcher::ActionMatcher;
///
/// let matcher = ActionMatcher::new(["*"], ["Public.*"]).unwrap();
/// assert!(matcher.matches("User.Delete"));
/// assert!(!matcher.matches("Public.Ping"));
/// ```
#[derive(Debug, Clone)]
pub struct ActionMatcher {
    whitelist: Vec<Glob>,
    blacklist: Vec<Glob>,
}

impl ActionMatcher {
    /// Compile a matcher from whitelist and blacklist glob patterns.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError`] if a pattern fails to compile.
    pub fn new<W, B>(whitelist: W, blacklist: B) -> Result<Self, MatcherError>
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Ok(Self {
            whitelist: compile_all(whitelist)?,
            blacklist: compile_all(blacklist)?,
        })
    }

    /// Whether the action must carry a valid signature.
    #[must_use]
    pub fn matches(&self, action: &str) -> bool {
        if self.blacklist.iter().any(|g| g.is_match(action)) {
            return false;
        }
        self.whitelist.iter().any(|g| g.is_match(action))
    }

    /// The whitelist patterns, in configuration order.
    pub fn whitelist(&self) -> impl Iterator<Item = &str> {
        self.whitelist.iter().map(|g| g.pattern.as_str())
    }

    /// The blacklist patterns, in configuration order.
    pub fn blacklist(&self) -> impl Iterator<Item = &str> {
        self.blacklist.iter().map(|g| g.pattern.as_str())
    }
}

impl Default for ActionMatcher {
    /// Enforce every action.
    fn default() -> Self {
        Self::new(["*"], std::iter::empty::<&str>()).expect("the `*` glob always compiles")
    }
}

fn compile_all<I>(patterns: I) -> Result<Vec<Glob>, MatcherError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| Glob::new(p.as_ref()))
        .collect()
}

/// Translate a glob into an anchored regular expression.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("^(?s:");
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }
    out.push_str(")$");
    out
}
