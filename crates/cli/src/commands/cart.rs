//! Cart commands.

use cartsync_client::{CartError, CartSignal, CartUpdate, OptimisticController, QuantityChange};
use cartsync_core::{Cart, CartItemId, CartSummary, ProductId};

use super::{CommandError, Context};

/// Show the current cart.
pub async fn show(ctx: &Context) -> Result<(), CommandError> {
    let cart = ctx.service.get_current().await?;
    render_cart(ctx, &cart)
}

/// Show the cart summary.
pub async fn summary(ctx: &Context) -> Result<(), CommandError> {
    let summary = ctx.service.summary().await?;
    render_summary(ctx, &summary)
}

/// Add units of a product.
pub async fn add(ctx: &Context, product: &str, quantity: u32) -> Result<(), CommandError> {
    tracing::info!("Adding {quantity} x {product}...");
    let update = ctx.service.add_item(product, quantity).await?;
    render_update(ctx, &update)
}

/// Set a product's quantity through the optimistic controller.
pub async fn set(
    ctx: &Context,
    product: &str,
    quantity: i64,
    stock: Option<u32>,
) -> Result<(), CommandError> {
    let product_id = ProductId::parse(product)
        .map_err(|e| CartError::invalid("product_id", e.to_string()))?;

    let controller = OptimisticController::new(ctx.service.clone(), &ctx.config);
    let mut signals = controller.subscribe();
    if let Some(available) = stock {
        controller.set_stock(product_id, available).await;
    }

    controller.refresh().await?;
    let before = controller.snapshot(product_id).confirmed_quantity;
    let result = controller.change_quantity(product_id, quantity).await;

    while let Ok(signal) = signals.try_recv() {
        report_signal(&signal);
    }

    match result? {
        QuantityChange::Confirmed(confirmed) => {
            tracing::info!("{product_id}: {before} -> {confirmed}");
        }
        QuantityChange::Queued { target } => {
            tracing::info!("{product_id}: {target} queued");
        }
    }
    Ok(())
}

/// Remove a cart line.
pub async fn remove(ctx: &Context, item: &str) -> Result<(), CommandError> {
    let item_id =
        CartItemId::parse(item).map_err(|e| CartError::invalid("item_id", e.to_string()))?;
    let update = ctx.service.remove_item(item_id).await?;
    render_update(ctx, &update)
}

/// Remove every line.
pub async fn clear(ctx: &Context) -> Result<(), CommandError> {
    let update = ctx.service.clear_cart().await?;
    render_update(ctx, &update)
}

// =============================================================================
// Output
// =============================================================================

fn render_update(ctx: &Context, update: &CartUpdate) -> Result<(), CommandError> {
    match &update.cart {
        Some(cart) => render_cart(ctx, cart),
        None => render_summary(ctx, &update.summary),
    }
}

fn render_cart(ctx: &Context, cart: &Cart) -> Result<(), CommandError> {
    if ctx.json {
        tracing::info!("{}", serde_json::to_string_pretty(&redacted(cart))?);
        return Ok(());
    }

    if cart.is_empty {
        tracing::info!("Cart is empty");
        return Ok(());
    }

    for item in &cart.items {
        tracing::info!(
            "{} x {} ({}) @ {} = {}  [item {}]",
            item.quantity,
            item.product.name,
            item.product.id,
            item.product.unit_price,
            item.total_price,
            item.id,
        );
    }
    render_summary(ctx, &cart.summary())
}

/// Copy of the cart without the session key, which must never reach the logs.
fn redacted(cart: &Cart) -> Cart {
    let mut cart = cart.clone();
    cart.owner.session_key = None;
    cart
}

fn render_summary(ctx: &Context, summary: &CartSummary) -> Result<(), CommandError> {
    if ctx.json {
        tracing::info!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    tracing::info!(
        "{} item(s) in {} line(s), total {}",
        summary.total_items,
        summary.items_count,
        summary.total_price,
    );
    Ok(())
}

fn report_signal(signal: &CartSignal) {
    match signal {
        CartSignal::StockCeiling {
            requested,
            available,
            ..
        } => tracing::warn!("Only {available} in stock, {requested} requested"),
        CartSignal::Throttled { retry_after, .. } => match retry_after {
            Some(secs) => tracing::warn!("Too many requests, wait {secs}s and try again"),
            None => tracing::warn!("Too many requests, wait a moment and try again"),
        },
        CartSignal::OutOfStock { message, .. } => tracing::warn!("Not enough stock: {message}"),
        CartSignal::Failed { message, .. } => tracing::warn!("Change rolled back: {message}"),
        CartSignal::Confirmed { .. } => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartsync_core::{CartOwner, OwnerKind};

    use super::*;

    #[test]
    fn test_json_output_omits_session_key() {
        let mut cart = Cart::empty();
        cart.owner = CartOwner {
            kind: OwnerKind::Session,
            session_key: Some("tok-7f3a9c".to_string()),
        };

        let rendered = serde_json::to_string_pretty(&redacted(&cart)).unwrap();

        assert!(!rendered.contains("tok-7f3a9c"));
        assert!(rendered.contains("session"));
        assert_eq!(cart.owner.session_key.as_deref(), Some("tok-7f3a9c"));
    }
}
