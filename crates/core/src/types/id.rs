//! Newtype IDs for type-safe entity references.
//!
//! Every identifier the cart API hands out is an opaque UUID. Use the
//! `define_id!` macro to create wrappers that prevent accidentally passing a
//! cart item ID where a product ID is expected.

use thiserror::Error;

/// Error returned when a string is not a well-formed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value:?}")]
pub struct IdParseError {
    /// Which identifier type was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `uuid::Uuid` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_uuid()`, `parse()`
/// - `FromStr`, `Display`, `From<Uuid>` and `Into<Uuid>` implementations
///
/// # Example
///
/// ```rust
/// # use cartsync_core::define_id;
/// define_id!(WishlistId);
///
/// assert!(WishlistId::parse("8f6c2a38-7f0e-4a55-9d1e-0b1f9a8f6d11").is_ok());
/// assert!(WishlistId::parse("not-a-uuid").is_err());
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Create a new ID from a UUID value.
            #[must_use]
            pub const fn new(id: ::uuid::Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID value.
            #[must_use]
            pub const fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }

            /// Parse an ID from its textual form.
            ///
            /// Surrounding whitespace is ignored.
            ///
            /// # Errors
            ///
            /// Returns [`IdParseError`](crate::types::id::IdParseError) if the
            /// input is not a UUID.
            pub fn parse(s: &str) -> ::core::result::Result<Self, $crate::types::id::IdParseError> {
                ::uuid::Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| $crate::types::id::IdParseError {
                        kind: stringify!($name),
                        value: s.to_owned(),
                    })
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::types::id::IdParseError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(id: ::uuid::Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for ::uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

// Define cart entity IDs
define_id!(CartId);
define_id!(CartItemId);
define_id!(ProductId);
