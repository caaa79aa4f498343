//! Credential header attached to every source API request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Scheme whose token is base64-encoded before it is sent.
const BASIC_SCHEME: &str = "Basic";

/// Immutable credential descriptor for one source.
///
/// The header is `<key>: <scheme> <token>`. A `Basic` token is given as
/// `user:password` and encoded once at construction; Bearer and Cookie
/// tokens are sent verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationHeader {
    key: Option<String>,
    scheme: Option<String>,
    token: Option<String>,
    anonymous: bool,
}

impl AuthenticationHeader {
    /// Build a header from its three parts. Missing parts make it invalid.
    pub fn new(key: Option<String>, scheme: Option<String>, token: Option<String>) -> Self {
        let token = match (scheme.as_deref(), token) {
            (Some(BASIC_SCHEME), Some(raw)) if !raw.is_empty() => Some(STANDARD.encode(raw)),
            (_, token) => token,
        };

        Self {
            key,
            scheme,
            token,
            anonymous: false,
        }
    }

    /// A source reachable without credentials. Valid, but emits no header.
    pub fn anonymous() -> Self {
        Self {
            key: None,
            scheme: None,
            token: None,
            anonymous: true,
        }
    }

    /// True iff key, scheme and token are all present and non-empty,
    /// or the header is explicitly anonymous.
    pub fn is_valid(&self) -> bool {
        if self.anonymous {
            return true;
        }
        [&self.key, &self.scheme, &self.token]
            .iter()
            .all(|part| part.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Whether this header suppresses emission entirely.
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// The header as a name/value pair, or `None` when nothing should be sent.
    pub fn to_name_value_pair(&self) -> Option<(String, String)> {
        if self.anonymous || !self.is_valid() {
            return None;
        }
        let key = self.key.as_deref()?;
        let scheme = self.scheme.as_deref()?;
        let token = self.token.as_deref()?;
        Some((key.to_string(), format!("{scheme} {token}")))
    }
}

// Never print the token.
impl std::fmt::Debug for AuthenticationHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationHeader")
            .field("key", &self.key)
            .field("scheme", &self.scheme)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("anonymous", &self.anonymous)
            .finish()
    }
}
