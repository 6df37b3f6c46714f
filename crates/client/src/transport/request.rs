//! Request and response values exchanged with the cart API.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use cartsync_core::Identity;
use reqwest::Method;
use secrecy::ExposeSecret;

/// Cart API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `GET cart/current`
    GetCurrent,
    /// `GET cart/summary`
    GetSummary,
    /// `POST cart/add_item`
    AddItem,
    /// `PATCH cart/update_item`
    UpdateItem,
    /// `DELETE cart/remove_item?item_id=`
    RemoveItem,
    /// `DELETE cart/clear`
    Clear,
}

impl Operation {
    /// HTTP method of the operation.
    #[must_use]
    pub fn method(self) -> Method {
        match self {
            Self::GetCurrent | Self::GetSummary => Method::GET,
            Self::AddItem => Method::POST,
            Self::UpdateItem => Method::PATCH,
            Self::RemoveItem | Self::Clear => Method::DELETE,
        }
    }

    /// Endpoint path relative to the API base URL.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::GetCurrent => "cart/current",
            Self::GetSummary => "cart/summary",
            Self::AddItem => "cart/add_item",
            Self::UpdateItem => "cart/update_item",
            Self::RemoveItem => "cart/remove_item",
            Self::Clear => "cart/clear",
        }
    }

    /// Reads are idempotent and may be retried; mutations never are.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::GetCurrent | Self::GetSummary)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetCurrent => "get_current",
            Self::GetSummary => "get_summary",
            Self::AddItem => "add_item",
            Self::UpdateItem => "update_item",
            Self::RemoveItem => "remove_item",
            Self::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// The credentials a request is sent with, reduced to a comparable tag.
///
/// Holds a hash of the token or session key, never the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdentityScope {
    /// No identity.
    #[default]
    None,
    /// Anonymous session, by session key hash.
    Session(u64),
    /// Signed-in user, by bearer token hash.
    User(u64),
}

impl IdentityScope {
    /// Tag for the given identity.
    #[must_use]
    pub fn of(identity: &Identity) -> Self {
        fn digest(value: &str) -> u64 {
            let mut hasher = DefaultHasher::new();
            value.hash(&mut hasher);
            hasher.finish()
        }

        match identity {
            Identity::Authenticated(token) => Self::User(digest(token.expose_secret())),
            Identity::Anonymous(key) => Self::Session(digest(key)),
            Identity::None => Self::None,
        }
    }
}

/// Identifies one logical request for in-flight deduplication.
///
/// Two requests with equal keys are the same request: while one is in
/// flight, the other waits on it instead of hitting the network. The
/// identity scope is part of the key, so a read issued after signing in
/// never joins a read still in flight for the guest cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingOperationKey {
    /// The operation.
    pub operation: Operation,
    /// Product or cart item the operation targets, if any.
    pub target: Option<String>,
    /// Requested quantity, if any.
    pub quantity: Option<u32>,
    /// Credentials the request is sent with. Not part of the display form.
    pub scope: IdentityScope,
}

impl PendingOperationKey {
    /// Key for an operation without a target.
    #[must_use]
    pub const fn bare(operation: Operation) -> Self {
        Self {
            operation,
            target: None,
            quantity: None,
            scope: IdentityScope::None,
        }
    }

    /// Key for an operation on a target.
    #[must_use]
    pub fn targeted(operation: Operation, target: impl fmt::Display, quantity: Option<u32>) -> Self {
        Self {
            operation,
            target: Some(target.to_string()),
            quantity,
            scope: IdentityScope::None,
        }
    }

    /// The same key, scoped to `identity`.
    #[must_use]
    pub fn scoped_to(mut self, identity: &Identity) -> Self {
        self.scope = IdentityScope::of(identity);
        self
    }
}

impl fmt::Display for PendingOperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(target) = &self.target {
            write!(f, ":{target}")?;
        }
        if let Some(quantity) = self.quantity {
            write!(f, ":{quantity}")?;
        }
        Ok(())
    }
}

/// A request ready to be sent.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Deduplication key; also names the operation.
    pub key: PendingOperationKey,
    /// Query string parameters.
    pub query: Vec<(&'static str, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// A request without query or body.
    #[must_use]
    pub const fn new(key: PendingOperationKey) -> Self {
        Self {
            key,
            query: Vec::new(),
            body: None,
        }
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    /// The operation this request performs.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.key.operation
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body (`Null` for an empty body).
    pub body: serde_json::Value,
    /// Value of the session key response header, if present.
    pub session_header: Option<String>,
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn test_only_gets_are_reads() {
        assert!(Operation::GetCurrent.is_read());
        assert!(Operation::GetSummary.is_read());
        assert!(!Operation::AddItem.is_read());
        assert!(!Operation::RemoveItem.is_read());
    }

    #[test]
    fn test_key_equality_includes_quantity() {
        let a = PendingOperationKey::targeted(Operation::UpdateItem, "item-1", Some(5));
        let b = PendingOperationKey::targeted(Operation::UpdateItem, "item-1", Some(5));
        let c = PendingOperationKey::targeted(Operation::UpdateItem, "item-1", Some(6));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "update_item:item-1:5");
    }

    #[test]
    fn test_key_equality_includes_identity_scope() {
        let guest = PendingOperationKey::bare(Operation::GetCurrent)
            .scoped_to(&Identity::Anonymous("tok-guest".to_string()));
        let user = PendingOperationKey::bare(Operation::GetCurrent)
            .scoped_to(&Identity::Authenticated(SecretString::from("user-token")));
        let other_user = PendingOperationKey::bare(Operation::GetCurrent)
            .scoped_to(&Identity::Authenticated(SecretString::from("other-token")));
        let same_guest = PendingOperationKey::bare(Operation::GetCurrent)
            .scoped_to(&Identity::Anonymous("tok-guest".to_string()));

        assert_ne!(guest, user);
        assert_ne!(user, other_user);
        assert_eq!(guest, same_guest);
        assert_eq!(user.to_string(), "get_current");
        assert!(!format!("{user:?}").contains("user-token"));
    }
}
