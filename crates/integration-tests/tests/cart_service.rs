//! Cart reads and mutations over HTTP.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use cartsync_client::{CartError, CartService, ErrorKind, IdentityStore, Transport};
use cartsync_core::CartItemId;
use cartsync_integration_tests::{Method, MockCartServer, StatusCode, unreachable_base_url};
use rust_decimal::Decimal;
use serde_json::json;

/// A service with an established session, so no bootstrap call interferes.
fn guest_service(server: &MockCartServer) -> CartService {
    let identity = IdentityStore::in_memory();
    identity.set("tok-guest").unwrap();
    server.service(identity)
}

#[tokio::test]
async fn test_malformed_product_id_never_reaches_the_network() {
    let server = MockCartServer::start().await;
    let service = server.service(IdentityStore::in_memory());

    let err = service.add_item("pineapple-123", 1).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(server.request_count(), 0);
}

#[tokio::test]
async fn test_add_item_returns_cart_and_summary() {
    let server = MockCartServer::start().await;
    let product = server.add_product("Dried Pineapple", "4.50", None);
    let service = guest_service(&server);

    let update = service.add_item(&product.to_string(), 2).await.unwrap();

    let cart = update.cart.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product.unit_price, Decimal::new(450, 2));
    assert_eq!(cart.total_price, Decimal::new(900, 2));
    assert_eq!(update.summary.total_items, 2);
    assert!(!update.summary.is_empty);

    let body = server.requests()[0].body.clone().unwrap();
    assert_eq!(body, json!({"product_id": product.to_string(), "quantity": 2}));
}

#[tokio::test]
async fn test_update_remove_and_clear() {
    let server = MockCartServer::start().await;
    let pineapple = server.add_product("Dried Pineapple", "4.50", None);
    let mango = server.add_product("Dried Mango", "3.25", None);
    let service = guest_service(&server);

    service.add_item(&pineapple.to_string(), 1).await.unwrap();
    let cart = service
        .add_item(&mango.to_string(), 1)
        .await
        .unwrap()
        .cart
        .unwrap();
    let mango_line = cart.items.iter().find(|i| i.product.name == "Dried Mango").unwrap().id;

    let update = service.update_item(mango_line, 3).await.unwrap();
    assert_eq!(update.summary.total_items, 4);

    let update = service.remove_item(mango_line).await.unwrap();
    assert!(update.cart.is_none(), "remove answers with a summary only");
    assert_eq!(update.summary.total_items, 1);
    let remove = server.requests().pop().unwrap();
    assert_eq!(remove.query, Some(format!("item_id={mango_line}")));

    let update = service.clear_cart().await.unwrap();
    assert!(update.summary.is_empty);
    assert!(service.get_current().await.unwrap().is_empty);
}

#[tokio::test]
async fn test_update_to_zero_is_rejected_locally() {
    let server = MockCartServer::start().await;
    let service = guest_service(&server);

    let err = service
        .update_item(CartItemId::new(uuid::Uuid::new_v4()), 0)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(server.request_count(), 0);
}

#[tokio::test]
async fn test_unreachable_server_yields_empty_cart() {
    let config = cartsync_client::CartClientConfig::new(unreachable_base_url())
        .with_bootstrap_timeout(Duration::from_millis(500))
        .with_read_retry(2, Duration::from_millis(5));
    let service = CartService::new(Transport::new(&config, IdentityStore::in_memory()).unwrap());

    let cart = service.get_current().await.unwrap();

    assert!(cart.is_empty);
    assert!(cart.items.is_empty());
    assert_eq!(cart.total_items, 0);
}

#[tokio::test]
async fn test_stock_rejection_is_a_validation_error() {
    let server = MockCartServer::start().await;
    let product = server.add_product("Dried Pineapple", "4.50", Some(3));
    let service = guest_service(&server);

    let err = service.add_item(&product.to_string(), 4).await.unwrap_err();

    assert!(err.is_stock_error());
    let CartError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert_eq!(
        errors.get("quantity"),
        Some(&["Only 3 left in stock.".to_string()][..])
    );
}

#[tokio::test]
async fn test_reads_retry_but_mutations_do_not() {
    let server = MockCartServer::start().await;
    let product = server.add_product("Dried Pineapple", "4.50", None);
    let service = guest_service(&server);

    server.fail_next(StatusCode::SERVICE_UNAVAILABLE, json!({"detail": "Try later."}));
    server.fail_next(StatusCode::SERVICE_UNAVAILABLE, json!({"detail": "Try later."}));
    service.get_current().await.unwrap();
    assert_eq!(server.count(&Method::GET, "cart/current"), 3);

    server.fail_next(StatusCode::SERVICE_UNAVAILABLE, json!({"detail": "Try later."}));
    let err = service.add_item(&product.to_string(), 1).await.unwrap_err();
    assert!(matches!(err, CartError::Server { status: 503, .. }));
    assert_eq!(server.count(&Method::POST, "cart/add_item"), 1);
}

#[tokio::test]
async fn test_identical_concurrent_mutations_are_sent_once() {
    let server = MockCartServer::start().await;
    let product = server.add_product("Dried Pineapple", "4.50", None);
    let service = guest_service(&server);
    server.set_delay(Duration::from_millis(100));

    let product = product.to_string();
    let (first, second) = tokio::join!(
        service.add_item(&product, 1),
        service.add_item(&product, 1),
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(server.count(&Method::POST, "cart/add_item"), 1);
    assert_eq!(service.transport().pending_count(), 0);
}

#[tokio::test]
async fn test_throttle_carries_retry_after() {
    let server = MockCartServer::start().await;
    let product = server.add_product("Dried Pineapple", "4.50", None);
    let service = guest_service(&server);
    server.throttle_next(Some(7));

    let err = service.add_item(&product.to_string(), 1).await.unwrap_err();

    assert!(matches!(err, CartError::Throttled { retry_after: Some(7) }));
}
