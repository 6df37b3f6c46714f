//! Cart ownership identity.

use secrecy::{ExposeSecret, SecretString};

/// Who owns the cart a request operates on.
///
/// A bearer token always wins over an anonymous session key: once a user is
/// signed in, the session key is never transmitted even if one is still
/// stored from an earlier guest visit.
#[derive(Debug, Clone, Default)]
pub enum Identity {
    /// Signed-in account, identified by a bearer token.
    Authenticated(SecretString),
    /// Anonymous visitor, identified by a server-assigned session key.
    Anonymous(String),
    /// No identity yet; the server assigns one on the first cart read.
    #[default]
    None,
}

impl Identity {
    /// Resolve the identity from whatever credentials are stored.
    ///
    /// Empty or whitespace-only values count as absent.
    #[must_use]
    pub fn resolve(bearer: Option<SecretString>, session_key: Option<String>) -> Self {
        if let Some(token) = bearer.filter(|t| !t.expose_secret().trim().is_empty()) {
            return Self::Authenticated(token);
        }
        match session_key {
            Some(key) if !key.trim().is_empty() => Self::Anonymous(key),
            _ => Self::None,
        }
    }

    /// Returns true if a bearer token is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Returns true if neither a bearer token nor a session key is present.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The anonymous session key, if this is an anonymous identity.
    #[must_use]
    pub fn session_key(&self) -> Option<&str> {
        match self {
            Self::Anonymous(key) => Some(key),
            _ => None,
        }
    }
}
