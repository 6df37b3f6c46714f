//! Cart domain types.
//!
//! These types describe a cart exactly as the server last reported it. The
//! client never persists them; they live for one render.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{CartId, CartItemId, ProductId};

// =============================================================================
// Owner
// =============================================================================

/// Kind of identity that owns a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// Signed-in account.
    User,
    /// Anonymous visitor.
    Session,
    /// Owner not reported (e.g. a degraded empty cart).
    #[default]
    Unknown,
}

/// Cart ownership as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CartOwner {
    /// Owner kind.
    pub kind: OwnerKind,
    /// Anonymous session key, present for session-owned carts.
    pub session_key: Option<String>,
}

// =============================================================================
// Items
// =============================================================================

/// Product snapshot embedded in a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartProduct {
    /// Product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Price of one unit.
    pub unit_price: Decimal,
}

/// A single cart line.
///
/// `quantity` is always at least 1; a product with zero quantity is
/// represented by the absence of its line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Cart line ID (used by update and remove).
    pub id: CartItemId,
    /// The product on this line.
    pub product: CartProduct,
    /// Units of the product.
    pub quantity: u32,
    /// Line total.
    pub total_price: Decimal,
}

// =============================================================================
// Cart
// =============================================================================

/// Server-authoritative cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Cart ID (absent for a degraded empty cart).
    pub id: Option<CartId>,
    /// Cart lines.
    pub items: Vec<CartItem>,
    /// Sum of all line totals.
    pub total_price: Decimal,
    /// Sum of all line quantities.
    pub total_items: u32,
    /// Number of distinct lines.
    pub items_count: u32,
    /// Whether the cart has no lines.
    pub is_empty: bool,
    /// Who owns the cart.
    pub owner: CartOwner,
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// A well-formed empty cart.
    ///
    /// Used when a read cannot reach the server, so callers render an empty
    /// cart instead of failing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            id: None,
            items: Vec::new(),
            total_price: Decimal::ZERO,
            total_items: 0,
            items_count: 0,
            is_empty: true,
            owner: CartOwner::default(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Summarize this cart.
    #[must_use]
    pub const fn summary(&self) -> CartSummary {
        CartSummary {
            total_items: self.total_items,
            total_price: self.total_price,
            items_count: self.items_count,
            is_empty: self.is_empty,
        }
    }

    /// Find the line holding a product.
    #[must_use]
    pub fn item_for_product(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product.id == product_id)
    }

    /// Quantity of a product in this cart (0 when absent).
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.item_for_product(product_id)
            .map_or(0, |item| item.quantity)
    }
}

/// Lightweight cart aggregate returned with every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    /// Sum of all line quantities.
    pub total_items: u32,
    /// Sum of all line totals.
    pub total_price: Decimal,
    /// Number of distinct lines.
    pub items_count: u32,
    /// Whether the cart has no lines.
    pub is_empty: bool,
}

impl CartSummary {
    /// Summary of an empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            total_items: 0,
            total_price: Decimal::ZERO,
            items_count: 0,
            is_empty: true,
        }
    }
}

impl Default for CartSummary {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&Cart> for CartSummary {
    fn from(cart: &Cart) -> Self {
        cart.summary()
    }
}
