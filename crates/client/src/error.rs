//! Error taxonomy for cart synchronization.
//!
//! Raw failures (`reqwest` errors, status codes, error bodies) are turned into
//! a [`CartError`] in exactly one place, the transport. Every layer above it
//! propagates the classified error unchanged.
//!
//! `CartError` is `Clone` because a single deduplicated request may have
//! several waiters, each of which receives the same outcome.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

// =============================================================================
// FieldErrors
// =============================================================================

/// Per-field validation messages, as returned by the API (or produced locally).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Field errors with a single message on a single field.
    #[must_use]
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.push(field, message);
        errors
    }

    /// Append a message to a field.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Messages for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Returns true if no field has a message.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(field, messages)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Returns true if these errors are about stock or quantity limits.
    #[must_use]
    pub fn mentions_stock(&self) -> bool {
        self.0.iter().any(|(field, messages)| {
            field == "quantity"
                || field == "stock"
                || messages
                    .iter()
                    .any(|m| m.to_ascii_lowercase().contains("stock"))
        })
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(no field details)");
        }

        let parts = self
            .0
            .iter()
            .map(|(field, messages)| format!("{field}: {}", messages.join(", ")))
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join("; "))
    }
}

// =============================================================================
// IdentityError
// =============================================================================

/// Errors raised by the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The token was empty after trimming.
    #[error("token cannot be empty")]
    Empty,

    /// The storage backend failed.
    #[error("identity storage error: {0}")]
    Storage(String),

    /// The value read back after a write differs from what was written.
    #[error("identity storage corrupted: wrote {expected_len} chars, read back {found:?}")]
    Corrupted {
        /// Length of the value that was written (the value itself is not kept).
        expected_len: usize,
        /// Length of what was read back, if anything.
        found: Option<usize>,
    },
}

// =============================================================================
// CartError
// =============================================================================

/// Classified cart failure.
#[derive(Debug, Clone, Error)]
pub enum CartError {
    /// Field-specific, recoverable by correcting input.
    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    /// HTTP 429; retryable after backoff.
    #[error("{}", format_throttled(.retry_after.as_ref().copied()))]
    Throttled {
        /// Seconds the server asked us to wait, if it said.
        retry_after: Option<u64>,
    },

    /// No response reached the client.
    #[error("Network error: {0}")]
    Network(String),

    /// Any other non-2xx response, or an unusable 2xx body.
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Detail extracted from the body.
        message: String,
    },

    /// The identity store failed.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

/// Coarse classification of a [`CartError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Throttle,
    Network,
    Server,
    Identity,
}

impl CartError {
    /// Shorthand for a local validation failure on one field.
    #[must_use]
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(field, message))
    }

    /// The error's classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Throttled { .. } => ErrorKind::Throttle,
            Self::Network(_) => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::Identity(_) => ErrorKind::Identity,
        }
    }

    /// Whether repeating an idempotent request might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Throttled { .. } | Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Validation(_) | Self::Identity(_) => false,
        }
    }

    /// Returns true for validation errors about stock or quantity limits.
    #[must_use]
    pub fn is_stock_error(&self) -> bool {
        matches!(self, Self::Validation(errors) if errors.mentions_stock())
    }
}

fn format_throttled(retry_after: Option<u64>) -> String {
    retry_after.map_or_else(
        || "Rate limited, retry later".to_string(),
        |secs| format!("Rate limited, retry after {secs} seconds"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_display() {
        let mut errors = FieldErrors::single("quantity", "Only 3 left in stock");
        errors.push("product_id", "Invalid pk");
        assert_eq!(
            errors.to_string(),
            "product_id: Invalid pk; quantity: Only 3 left in stock"
        );
    }

    #[test]
    fn test_mentions_stock() {
        assert!(FieldErrors::single("quantity", "too many").mentions_stock());
        assert!(FieldErrors::single("non_field_errors", "Insufficient STOCK").mentions_stock());
        assert!(!FieldErrors::single("product_id", "Invalid pk").mentions_stock());
    }

    #[test]
    fn test_throttled_display() {
        let err = CartError::Throttled {
            retry_after: Some(60),
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 60 seconds");

        let err = CartError::Throttled { retry_after: None };
        assert_eq!(err.to_string(), "Rate limited, retry later");
    }

    #[test]
    fn test_kind_and_retryable() {
        assert_eq!(CartError::Network("down".into()).kind(), ErrorKind::Network);
        assert!(CartError::Network("down".into()).is_retryable());
        assert!(
            CartError::Server {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !CartError::Server {
                status: 404,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!CartError::invalid("quantity", "bad").is_retryable());
    }

    #[test]
    fn test_stock_error_detection() {
        assert!(CartError::invalid("quantity", "Only 2 available").is_stock_error());
        assert!(!CartError::invalid("product_id", "Invalid").is_stock_error());
        assert!(!CartError::Throttled { retry_after: None }.is_stock_error());
    }
}
