//! Cart operations over the transport.
//!
//! Reads degrade to an empty cart when the server cannot be reached.
//! Mutations validate their input locally first, then return the updated
//! cart together with its summary so callers never need a second read.

mod wire;

pub use wire::{parse_cart, parse_mutation, parse_summary};

use cartsync_core::{Cart, CartItemId, CartSummary, ProductId};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::error::CartError;
use crate::transport::{ApiRequest, Operation, PendingOperationKey, Transport};

/// Result of a cart mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartUpdate {
    /// The updated cart, when the server sent it.
    pub cart: Option<Cart>,
    /// Summary of the updated cart.
    pub summary: CartSummary,
}

/// Cart API client.
#[derive(Clone)]
pub struct CartService {
    transport: Transport,
}

impl CartService {
    /// Create a cart service over a transport.
    #[must_use]
    pub const fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch the current cart.
    ///
    /// A network failure yields [`Cart::empty`] instead of an error.
    ///
    /// # Errors
    ///
    /// Returns any other classified `CartError`.
    #[instrument(skip(self))]
    pub async fn get_current(&self) -> Result<Cart, CartError> {
        let request = ApiRequest::new(PendingOperationKey::bare(Operation::GetCurrent));
        match self.transport.execute(request).await {
            Ok(response) => parse_cart(response.status, response.body),
            Err(CartError::Network(reason)) => {
                warn!(%reason, "Cart unreachable, showing empty cart");
                Ok(Cart::empty())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the cart summary.
    ///
    /// A network failure yields [`CartSummary::empty`] instead of an error.
    ///
    /// # Errors
    ///
    /// Returns any other classified `CartError`.
    #[instrument(skip(self))]
    pub async fn summary(&self) -> Result<CartSummary, CartError> {
        let request = ApiRequest::new(PendingOperationKey::bare(Operation::GetSummary));
        match self.transport.execute(request).await {
            Ok(response) => parse_summary(response.status, response.body),
            Err(CartError::Network(reason)) => {
                warn!(%reason, "Cart unreachable, showing empty summary");
                Ok(CartSummary::empty())
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of a product.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` without touching the network if the
    /// product id is malformed or `quantity` is 0.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_item(&self, product_id: &str, quantity: u32) -> Result<CartUpdate, CartError> {
        let product_id = ProductId::parse(product_id)
            .map_err(|e| CartError::invalid("product_id", e.to_string()))?;
        self.add_product(product_id, quantity).await
    }

    /// Add `quantity` units of an already-validated product id.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` without touching the network if
    /// `quantity` is 0.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_product(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartUpdate, CartError> {
        if quantity == 0 {
            return Err(CartError::invalid("quantity", "must be at least 1"));
        }

        let request = ApiRequest::new(PendingOperationKey::targeted(
            Operation::AddItem,
            product_id,
            Some(quantity),
        ))
        .with_body(json!({
            "product_id": product_id.to_string(),
            "quantity": quantity,
        }));

        self.mutate(request).await
    }

    /// Set the quantity of a cart line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` without touching the network if
    /// `quantity` is 0. Use [`Self::remove_item`] to drop a line.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn update_item(
        &self,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartUpdate, CartError> {
        if quantity == 0 {
            return Err(CartError::invalid(
                "quantity",
                "must be at least 1; remove the item instead",
            ));
        }

        let request = ApiRequest::new(PendingOperationKey::targeted(
            Operation::UpdateItem,
            item_id,
            Some(quantity),
        ))
        .with_body(json!({
            "item_id": item_id.to_string(),
            "quantity": quantity,
        }));

        self.mutate(request).await
    }

    /// Remove a cart line.
    ///
    /// # Errors
    ///
    /// Returns the classified `CartError` from the API.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_item(&self, item_id: CartItemId) -> Result<CartUpdate, CartError> {
        let request = ApiRequest::new(PendingOperationKey::targeted(
            Operation::RemoveItem,
            item_id,
            None,
        ))
        .with_query("item_id", item_id.to_string());

        self.mutate(request).await
    }

    /// Remove every line from the cart.
    ///
    /// # Errors
    ///
    /// Returns the classified `CartError` from the API.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<CartUpdate, CartError> {
        let request = ApiRequest::new(PendingOperationKey::bare(Operation::Clear));
        self.mutate(request).await
    }

    async fn mutate(&self, request: ApiRequest) -> Result<CartUpdate, CartError> {
        let operation = request.operation();
        let response = self.transport.execute(request).await?;
        let (cart, summary) = parse_mutation(response.status, response.body)?;

        debug!(
            %operation,
            total_items = summary.total_items,
            items_count = summary.items_count,
            "Cart updated"
        );

        Ok(CartUpdate { cart, summary })
    }
}
