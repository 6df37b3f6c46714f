//! User-facing signals emitted by the optimistic controller.

use cartsync_core::ProductId;

use crate::error::CartError;

/// Something the UI should tell the user about.
///
/// Delivered over a broadcast channel; a listener that falls behind loses
/// old signals rather than slowing down mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartSignal {
    /// A change was refused locally because it exceeds known stock.
    StockCeiling {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },
    /// The server rate limited a change; it was rolled back.
    Throttled {
        product_id: ProductId,
        retry_after: Option<u64>,
    },
    /// The server refused a change for lack of stock; it was rolled back.
    OutOfStock {
        product_id: ProductId,
        message: String,
    },
    /// Any other failure; the change was rolled back.
    Failed {
        product_id: ProductId,
        message: String,
    },
    /// The server confirmed a quantity.
    Confirmed { product_id: ProductId, quantity: u32 },
}

impl CartSignal {
    /// The rollback signal for a failed change.
    #[must_use]
    pub fn for_failure(product_id: ProductId, error: &CartError) -> Self {
        match error {
            CartError::Throttled { retry_after } => Self::Throttled {
                product_id,
                retry_after: *retry_after,
            },
            CartError::Validation(errors) if errors.mentions_stock() => Self::OutOfStock {
                product_id,
                message: errors.to_string(),
            },
            other => Self::Failed {
                product_id,
                message: other.to_string(),
            },
        }
    }

    /// Product the signal is about.
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        match self {
            Self::StockCeiling { product_id, .. }
            | Self::Throttled { product_id, .. }
            | Self::OutOfStock { product_id, .. }
            | Self::Failed { product_id, .. }
            | Self::Confirmed { product_id, .. } => *product_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        let p = ProductId::new(uuid::Uuid::new_v4());

        let signal = CartSignal::for_failure(p, &CartError::Throttled { retry_after: Some(3) });
        assert_eq!(
            signal,
            CartSignal::Throttled {
                product_id: p,
                retry_after: Some(3)
            }
        );

        let signal = CartSignal::for_failure(p, &CartError::invalid("quantity", "Only 2 left"));
        assert!(matches!(signal, CartSignal::OutOfStock { .. }));

        let signal = CartSignal::for_failure(p, &CartError::Network("refused".into()));
        assert!(matches!(signal, CartSignal::Failed { .. }));
        assert_eq!(signal.product_id(), p);
    }
}
