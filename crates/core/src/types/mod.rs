//! Core types for cartsync.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod id;
pub mod identity;
pub mod price;

pub use cart::{Cart, CartItem, CartOwner, CartProduct, CartSummary, OwnerKind};
pub use id::*;
pub use identity::Identity;
pub use price::{PriceError, WirePrice, parse_price};
