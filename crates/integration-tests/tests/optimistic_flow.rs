//! Optimistic quantity changes end to end.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use cartsync_client::{
    CartClientConfig, CartService, CartSignal, EntryState, ErrorKind, IdentityStore,
    OptimisticController, QuantityChange, Transport,
};
use cartsync_core::ProductId;
use cartsync_integration_tests::{Method, MockCartServer, unreachable_base_url};

struct Fixture {
    server: MockCartServer,
    service: CartService,
    controller: OptimisticController<CartService>,
}

async fn fixture() -> Fixture {
    let server = MockCartServer::start().await;
    let identity = IdentityStore::in_memory();
    identity.set("tok-guest").unwrap();
    let service = server.service(identity);
    let controller = OptimisticController::new(service.clone(), &server.config());
    Fixture {
        server,
        service,
        controller,
    }
}

fn product_id(id: uuid::Uuid) -> ProductId {
    ProductId::new(id)
}

#[tokio::test]
async fn test_over_stock_target_is_refused_without_network() {
    let Fixture {
        server,
        service,
        controller,
    } = fixture().await;
    let p = server.add_product("Dried Pineapple", "4.50", Some(5));
    service.add_item(&p.to_string(), 2).await.unwrap();
    controller.refresh().await.unwrap();
    controller.set_stock(product_id(p), 5).await;
    let mut signals = controller.subscribe();
    let seen = server.request_count();

    let err = controller
        .change_quantity(product_id(p), 9)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(controller.snapshot(product_id(p)).displayed_quantity, 2);
    assert_eq!(server.request_count(), seen, "zero network calls");
    assert!(matches!(
        signals.try_recv().unwrap(),
        CartSignal::StockCeiling { available: 5, .. }
    ));
}

#[tokio::test]
async fn test_zero_target_removes_the_line_once() {
    let Fixture {
        server,
        service,
        controller,
    } = fixture().await;
    let p = server.add_product("Dried Pineapple", "4.50", None);
    service.add_item(&p.to_string(), 3).await.unwrap();
    controller.refresh().await.unwrap();

    let outcome = controller.change_quantity(product_id(p), 0).await.unwrap();

    assert_eq!(outcome, QuantityChange::Confirmed(0));
    assert_eq!(server.count(&Method::DELETE, "cart/remove_item"), 1);
    assert_eq!(server.count(&Method::PATCH, "cart/update_item"), 0);
    assert!(service.get_current().await.unwrap().is_empty);
}

#[tokio::test]
async fn test_add_then_update_follows_committed_state() {
    let Fixture {
        server, controller, ..
    } = fixture().await;
    let p = server.add_product("Dried Mango", "3.25", None);

    controller.change_quantity(product_id(p), 2).await.unwrap();
    controller.change_quantity(product_id(p), 4).await.unwrap();

    assert_eq!(server.count(&Method::POST, "cart/add_item"), 1);
    let updates: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|r| r.is(&Method::PATCH, "cart/update_item"))
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].body.as_ref().unwrap()["quantity"], 4);
    assert_eq!(
        controller.state(product_id(p)),
        EntryState::Idle { confirmed: 4 }
    );
}

#[tokio::test]
async fn test_repeated_target_sends_one_mutation() {
    let Fixture {
        server, controller, ..
    } = fixture().await;
    let p = server.add_product("Dried Pineapple", "4.50", None);
    server.set_delay(Duration::from_millis(100));

    let (first, second) = tokio::join!(
        controller.change_quantity(product_id(p), 5),
        controller.change_quantity(product_id(p), 5),
    );

    assert_eq!(first.unwrap(), QuantityChange::Confirmed(5));
    assert_eq!(second.unwrap(), QuantityChange::Confirmed(5));
    assert_eq!(
        server.requests().iter().filter(|r| r.is_mutation()).count(),
        1
    );
}

#[tokio::test]
async fn test_latest_target_wins_over_in_flight_one() {
    let Fixture {
        server, controller, ..
    } = fixture().await;
    let p = server.add_product("Dried Pineapple", "4.50", None);
    server.set_delay(Duration::from_millis(100));

    let (first, second) = tokio::join!(
        controller.change_quantity(product_id(p), 2),
        controller.change_quantity(product_id(p), 6),
    );

    assert_eq!(first.unwrap(), QuantityChange::Confirmed(6));
    assert_eq!(second.unwrap(), QuantityChange::Queued { target: 6 });
    let entry = controller.snapshot(product_id(p));
    assert_eq!(entry.confirmed_quantity, 6);
    assert_eq!(entry.displayed_quantity, 6);
}

#[tokio::test]
async fn test_throttled_add_rolls_back() {
    let Fixture {
        server, controller, ..
    } = fixture().await;
    let p = server.add_product("Dried Pineapple", "4.50", None);
    let mut signals = controller.subscribe();
    server.throttle_next(Some(1));

    let err = controller
        .change_quantity(product_id(p), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Throttle);
    assert_eq!(controller.snapshot(product_id(p)).displayed_quantity, 0);
    assert_eq!(
        signals.try_recv().unwrap(),
        CartSignal::Throttled {
            product_id: product_id(p),
            retry_after: Some(1)
        }
    );
}

#[tokio::test]
async fn test_server_stock_refusal_signals_out_of_stock() {
    let Fixture {
        server, controller, ..
    } = fixture().await;
    let p = server.add_product("Dried Pineapple", "4.50", Some(2));
    let mut signals = controller.subscribe();

    let err = controller
        .change_quantity(product_id(p), 3)
        .await
        .unwrap_err();

    assert!(err.is_stock_error());
    assert_eq!(controller.snapshot(product_id(p)).displayed_quantity, 0);
    assert!(matches!(
        signals.try_recv().unwrap(),
        CartSignal::OutOfStock { .. }
    ));
}

#[tokio::test]
async fn test_network_failure_rolls_back_without_touching_other_products() {
    let Fixture {
        server, service, ..
    } = fixture().await;
    let pineapple = server.add_product("Dried Pineapple", "4.50", None);
    let mango = server.add_product("Dried Mango", "3.25", None);
    service.add_item(&pineapple.to_string(), 2).await.unwrap();
    let cart = service
        .add_item(&mango.to_string(), 1)
        .await
        .unwrap()
        .cart
        .unwrap();

    // Same cart state, but every call now fails to connect.
    let config = CartClientConfig::new(unreachable_base_url());
    let identity = IdentityStore::in_memory();
    identity.set("tok-guest").unwrap();
    let offline = CartService::new(Transport::new(&config, identity).unwrap());
    let controller = OptimisticController::new(offline, &config);
    controller.sync_from_cart(&cart);

    let err = controller
        .change_quantity(product_id(pineapple), 4)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    let entry = controller.snapshot(product_id(pineapple));
    assert_eq!(entry.displayed_quantity, 2);
    assert_eq!(entry.confirmed_quantity, 2);
    let other = controller.snapshot(product_id(mango));
    assert_eq!(other.displayed_quantity, 1);
    assert_eq!(other.confirmed_quantity, 1);
}
