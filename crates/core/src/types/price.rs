//! Price normalization using decimal arithmetic.
//!
//! The cart API serializes money as decimal strings (`"19.90"`) to preserve
//! precision, but some endpoints emit plain JSON numbers. Both are normalized
//! into [`Decimal`] before anything else sees them.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A price exactly as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePrice {
    /// Decimal amount as string (preserves precision).
    Text(String),
    /// Plain JSON number.
    Number(serde_json::Number),
}

impl Default for WirePrice {
    fn default() -> Self {
        Self::Text("0".to_string())
    }
}

/// Error returned when a wire price cannot be represented as a decimal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid price: {0:?}")]
pub struct PriceError(pub String);

/// Normalize a wire price into a [`Decimal`].
///
/// # Errors
///
/// Returns [`PriceError`] if the value is not a finite decimal number.
pub fn parse_price(price: &WirePrice) -> Result<Decimal, PriceError> {
    let text = match price {
        WirePrice::Text(s) => s.trim().to_string(),
        WirePrice::Number(n) => n.to_string(),
    };

    if text.is_empty() {
        return Err(PriceError(text));
    }

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| PriceError(text))
}
