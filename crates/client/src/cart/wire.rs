//! Wire types for cart API responses and their conversion into domain types.
//!
//! Wire types mirror the JSON loosely (every aggregate field optional, prices
//! as strings or numbers); conversion normalizes prices to decimals, drops
//! lines that cannot be represented, and derives missing aggregates.

use cartsync_core::{
    Cart, CartId, CartItem, CartItemId, CartOwner, CartProduct, CartSummary, OwnerKind, ProductId,
    WirePrice, parse_price,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::error::CartError;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WireCart {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub items: Vec<WireCartItem>,
    #[serde(default)]
    pub total_price: Option<WirePrice>,
    #[serde(default)]
    pub total_items: Option<u32>,
    #[serde(default)]
    pub items_count: Option<u32>,
    #[serde(default)]
    pub is_empty: Option<bool>,
    #[serde(default)]
    pub owner: Option<WireOwner>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct WireOwner {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, rename = "sessionKey", alias = "session_key")]
    pub session_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireCartItem {
    pub id: String,
    pub product: WireProduct,
    pub quantity: i64,
    #[serde(default)]
    pub total_price: Option<WirePrice>,
}

#[derive(Debug, Deserialize)]
pub struct WireProduct {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "price")]
    pub unit_price: WirePrice,
}

#[derive(Debug, Deserialize)]
pub struct WireSummary {
    #[serde(default)]
    pub total_items: u32,
    #[serde(default)]
    pub total_price: Option<WirePrice>,
    #[serde(default)]
    pub items_count: u32,
    #[serde(default)]
    pub is_empty: Option<bool>,
}

/// Body of a mutation response.
#[derive(Debug, Deserialize)]
pub struct WireMutation {
    #[serde(default)]
    pub cart: Option<WireCart>,
    #[serde(default)]
    pub summary: Option<WireSummary>,
}

// =============================================================================
// Parsing
// =============================================================================

fn malformed(status: u16, what: &str, err: &serde_json::Error) -> CartError {
    CartError::Server {
        status,
        message: format!("malformed {what} response: {err}"),
    }
}

/// Parse a cart body.
pub fn parse_cart(status: u16, body: serde_json::Value) -> Result<Cart, CartError> {
    let wire = serde_json::from_value::<WireCart>(body).map_err(|e| malformed(status, "cart", &e))?;
    Ok(convert_cart(wire))
}

/// Parse a summary body.
pub fn parse_summary(status: u16, body: serde_json::Value) -> Result<CartSummary, CartError> {
    let wire =
        serde_json::from_value::<WireSummary>(body).map_err(|e| malformed(status, "summary", &e))?;
    Ok(convert_summary(wire))
}

/// Parse a mutation body into the updated cart (if sent) and its summary.
///
/// Accepts `{cart, summary}`, either half alone, or a bare cart. A missing
/// summary is derived from the cart; a body with neither is an error.
pub fn parse_mutation(
    status: u16,
    body: serde_json::Value,
) -> Result<(Option<Cart>, CartSummary), CartError> {
    if body.get("items").is_some() {
        let cart = parse_cart(status, body)?;
        let summary = cart.summary();
        return Ok((Some(cart), summary));
    }

    let wire = serde_json::from_value::<WireMutation>(body)
        .map_err(|e| malformed(status, "mutation", &e))?;
    let cart = wire.cart.map(convert_cart);
    let summary = wire
        .summary
        .map(convert_summary)
        .or_else(|| cart.as_ref().map(Cart::summary));

    match summary {
        Some(summary) => Ok((cart, summary)),
        None => Err(CartError::Server {
            status,
            message: "mutation response carried neither cart nor summary".to_string(),
        }),
    }
}

// =============================================================================
// Conversions
// =============================================================================

fn normalize_price(price: Option<&WirePrice>, context: &str) -> Option<Decimal> {
    let price = price?;
    match parse_price(price) {
        Ok(amount) => Some(amount),
        Err(e) => {
            warn!(context, error = %e, "Unparseable price in cart response");
            None
        }
    }
}

pub fn convert_cart(wire: WireCart) -> Cart {
    let items: Vec<CartItem> = wire.items.into_iter().filter_map(convert_item).collect();

    let line_total: Decimal = items.iter().map(|item| item.total_price).sum();
    let quantity_total = items
        .iter()
        .map(|item| item.quantity)
        .fold(0u32, u32::saturating_add);
    let line_count = u32::try_from(items.len()).unwrap_or(u32::MAX);

    Cart {
        id: wire.id.as_deref().and_then(|id| CartId::parse(id).ok()),
        total_price: normalize_price(wire.total_price.as_ref(), "cart.total_price")
            .unwrap_or(line_total),
        total_items: wire.total_items.unwrap_or(quantity_total),
        items_count: wire.items_count.unwrap_or(line_count),
        is_empty: wire.is_empty.unwrap_or(items.is_empty()),
        owner: wire.owner.map(convert_owner).unwrap_or_default(),
        created_at: wire.created_at,
        updated_at: wire.updated_at,
        items,
    }
}

fn convert_owner(wire: WireOwner) -> CartOwner {
    let kind = match wire.kind.as_deref() {
        Some("user") => OwnerKind::User,
        Some("session" | "anonymous" | "guest") => OwnerKind::Session,
        _ => OwnerKind::Unknown,
    };
    CartOwner {
        kind,
        session_key: wire.session_key.filter(|k| !k.trim().is_empty()),
    }
}

fn convert_item(wire: WireCartItem) -> Option<CartItem> {
    let Ok(quantity) = u32::try_from(wire.quantity) else {
        warn!(item_id = %wire.id, quantity = wire.quantity, "Dropping cart line with invalid quantity");
        return None;
    };
    if quantity == 0 {
        // Zero is represented by absence.
        return None;
    }

    let (Ok(id), Ok(product_id)) = (CartItemId::parse(&wire.id), ProductId::parse(&wire.product.id))
    else {
        warn!(item_id = %wire.id, product_id = %wire.product.id, "Dropping cart line with malformed id");
        return None;
    };

    let unit_price = normalize_price(Some(&wire.product.unit_price), "product.unit_price")?;
    let total_price = normalize_price(wire.total_price.as_ref(), "item.total_price")
        .unwrap_or_else(|| unit_price * Decimal::from(quantity));

    Some(CartItem {
        id,
        product: CartProduct {
            id: product_id,
            name: wire.product.name,
            unit_price,
        },
        quantity,
        total_price,
    })
}

pub fn convert_summary(wire: WireSummary) -> CartSummary {
    CartSummary {
        total_items: wire.total_items,
        total_price: normalize_price(wire.total_price.as_ref(), "summary.total_price")
            .unwrap_or(Decimal::ZERO),
        items_count: wire.items_count,
        is_empty: wire.is_empty.unwrap_or(wire.items_count == 0),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const PRODUCT: &str = "8f6c2a38-7f0e-4a55-9d1e-0b1f9a8f6d11";
    const ITEM: &str = "1d0c9a5e-3b7a-4f0e-8c1d-2a6f7e9b0c33";

    fn cart_body() -> serde_json::Value {
        json!({
            "id": "5b1f0e7a-9c2d-4e3f-8a1b-6c7d8e9f0a12",
            "items": [{
                "id": ITEM,
                "product": {"id": PRODUCT, "name": "Dried Pineapple", "price": "4.50"},
                "quantity": 2,
                "total_price": "9.00"
            }],
            "total_price": "9.00",
            "total_items": 2,
            "items_count": 1,
            "is_empty": false,
            "owner": {"type": "session", "sessionKey": "tok-001"},
            "created_at": "2026-01-02T03:04:05Z",
            "updated_at": "2026-01-02T03:04:05Z"
        })
    }

    #[test]
    fn test_parse_cart_normalizes_prices() {
        let cart = parse_cart(200, cart_body()).unwrap();
        assert_eq!(cart.total_price, Decimal::new(900, 2));
        assert_eq!(cart.items.len(), 1);

        let item = &cart.items[0];
        assert_eq!(item.product.unit_price, Decimal::new(450, 2));
        assert_eq!(item.product.id, ProductId::parse(PRODUCT).unwrap());
        assert_eq!(cart.owner.kind, OwnerKind::Session);
        assert_eq!(cart.owner.session_key.as_deref(), Some("tok-001"));
        assert!(cart.created_at.is_some());
    }

    #[test]
    fn test_zero_quantity_lines_are_dropped() {
        let mut body = cart_body();
        body["items"][0]["quantity"] = json!(0);
        body.as_object_mut().unwrap().remove("total_items");
        body.as_object_mut().unwrap().remove("items_count");
        body.as_object_mut().unwrap().remove("is_empty");
        body.as_object_mut().unwrap().remove("total_price");

        let cart = parse_cart(200, body).unwrap();
        assert!(cart.items.is_empty());
        assert!(cart.is_empty);
        assert_eq!(cart.total_items, 0);
        assert_eq!(cart.total_price, Decimal::ZERO);
    }

    #[test]
    fn test_derived_item_total_saturates() {
        let mut body = cart_body();
        body["items"][0]["quantity"] = json!(u32::MAX);
        body["items"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "id": "7e2b4c6d-8f0a-4b1c-9d2e-3f4a5b6c7d88",
                "product": {
                    "id": "2a3b4c5d-6e7f-4a8b-9c0d-1e2f3a4b5c99",
                    "name": "Dried Mango",
                    "price": "3.25"
                },
                "quantity": 7,
                "total_price": "22.75"
            }));
        body.as_object_mut().unwrap().remove("total_items");

        let cart = parse_cart(200, body).unwrap();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.total_items, u32::MAX);
    }

    #[test]
    fn test_numeric_prices_accepted() {
        let mut body = cart_body();
        body["items"][0]["product"]["price"] = json!(4.5);
        body["total_price"] = json!(9);
        let cart = parse_cart(200, body).unwrap();
        assert_eq!(cart.total_price, Decimal::from(9));
        assert_eq!(cart.items[0].product.unit_price, Decimal::new(45, 1));
    }

    #[test]
    fn test_mutation_derives_missing_summary() {
        let (cart, summary) = parse_mutation(200, json!({"cart": cart_body()})).unwrap();
        assert!(cart.is_some());
        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.items_count, 1);
    }

    #[test]
    fn test_mutation_accepts_bare_cart_and_bare_summary() {
        let (cart, summary) = parse_mutation(200, cart_body()).unwrap();
        assert!(cart.is_some());
        assert!(!summary.is_empty);

        let body = json!({"summary": {"total_items": 0, "total_price": "0.00", "items_count": 0, "is_empty": true}});
        let (cart, summary) = parse_mutation(200, body).unwrap();
        assert!(cart.is_none());
        assert!(summary.is_empty);
    }

    #[test]
    fn test_mutation_without_cart_or_summary_is_server_error() {
        let err = parse_mutation(200, json!({"ok": true})).unwrap_err();
        assert!(matches!(err, CartError::Server { status: 200, .. }));
    }
}
