//! cartsync client - cart synchronization engine.
//!
//! Keeps a local, interactive cart mirror consistent with a
//! server-authoritative cart while the owner may be an anonymous visitor or a
//! signed-in account.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - [`identity`] - Durable storage of the bearer token and anonymous session key
//! - [`transport`] - HTTP wrapper: identity headers, token rotation, error
//!   classification, in-flight deduplication, read retries
//! - [`cart`] - Typed cart operations with price normalization and summaries
//! - [`optimistic`] - Per-product optimistic quantity state machine with rollback
//!
//! The server is the source of truth. Reads flow `CartService -> Transport ->
//! network`; writes round-trip from the controller through the service and
//! back as a confirmation or a rollback.
//!
//! # Example
//!
//! ```rust,ignore
//! use cartsync_client::{CartClientConfig, CartService, IdentityStore, OptimisticController, Transport};
//!
//! let config = CartClientConfig::from_env()?;
//! let transport = Transport::new(&config, IdentityStore::in_memory())?;
//! let service = CartService::new(transport);
//!
//! let cart = service.get_current().await?;
//! let controller = OptimisticController::new(service, &config);
//! controller.sync_from_cart(&cart);
//! controller.change_quantity(product_id, 3).await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod error;
pub mod identity;
pub mod optimistic;
pub mod transport;

pub use cart::{CartService, CartUpdate};
pub use config::{CartClientConfig, ConfigError};
pub use error::{CartError, ErrorKind, FieldErrors, IdentityError};
pub use identity::{FileStorage, IdentityStore, MemoryStorage, SessionStorage, StorageKey};
pub use optimistic::{
    CartMutations, CartSignal, EntryState, OptimisticController, OptimisticEntry, QuantityChange,
    StockCeilings,
};
pub use transport::{Operation, PendingOperationKey, Transport};
