use std::sync::Arc;

use chrono::{Duration, Utc};

use super::support::*;
use crate::cart::CartStore;
use crate::checkout::{create_order, place_order, supplier_quotes, Checkout, WantedLine};
use crate::config::Settings;
use crate::error::AppError;
use crate::memory_store::MemoryStore;
use crate::models::PaymentMethod;
use crate::store::Store;

async fn fill_cart(store: &MemoryStore, owner: &str, lines: &[(i64, i32)]) {
    let cart = CartStore::new(store, Duration::hours(48));
    for (item, qty) in lines {
        cart.add_item(owner, *item, *qty, Utc::now()).await.unwrap();
    }
}

#[tokio::test]
async fn cash_order_from_cart() {
    let store = seeded_store().await;
    let events = RecordingPublisher::default();
    fill_cart(&store, "amina", &[(10, 2), (11, 1)]).await;

    let response = place_order(
        &store,
        &events,
        &from_cart("amina", PaymentMethod::Cod),
        &Settings::default(),
        Utc::now(),
    )
    .await
    .unwrap();

    assert_eq!(response.total, 1500);
    assert_eq!(response.next, "confirmation");
    assert!(response.client_token.is_none());

    let order = store.order(response.order_id).await.unwrap().unwrap();
    assert_eq!(order.items_total, 1300);
    assert_eq!(order.delivery_fee, 200);
    assert_eq!(order.status, "Cod");
    assert_eq!(order.delivery_address.as_deref(), Some("Msasani, plot 12"));

    let items = store.order_items(&[order.id]).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items.iter().map(|i| i.subtotal).sum::<i64>() + order.delivery_fee, order.total);

    assert_eq!(store.menu_item(10).await.unwrap().stock, 3);
    assert_eq!(store.menu_item(11).await.unwrap().stock, 4);
    assert!(store.cart_lines("amina").await.unwrap().is_empty());

    assert_eq!(events.channels(), vec!["order.created", "supplier.dispatch"]);
    let dispatches = events.on("supplier.dispatch");
    let dispatch = &dispatches[0];
    assert_eq!(dispatch["orderId"], order.id);
    assert_eq!(dispatch["supplierName"], "Mama Ntilie");
    assert_eq!(dispatch["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn card_order_waits_for_payment() {
    let store = seeded_store().await;
    let events = RecordingPublisher::default();
    fill_cart(&store, "amina", &[(10, 1)]).await;

    let response = place_order(
        &store,
        &events,
        &from_cart("amina", PaymentMethod::Card),
        &Settings::default(),
        Utc::now(),
    )
    .await
    .unwrap();

    assert_eq!(response.next, "pay");
    let token = response.client_token.unwrap();
    assert!(token.starts_with(&format!("mock_{}_", response.order_id)));

    let order = store.order(response.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, "Pending");
    assert_eq!(order.total, 700);

    let payment = store.payment(order.id).await.unwrap().unwrap();
    assert_eq!(payment.provider, "mock");
    assert_eq!(payment.status, "initiated");
    assert_eq!(payment.amount, 700);
    assert_eq!(payment.client_token.as_deref(), Some(token.as_str()));

    assert!(events.on("supplier.dispatch").is_empty());
}

#[tokio::test]
async fn short_stock_rolls_everything_back() {
    let store = seeded_store().await;
    fill_cart(&store, "amina", &[(11, 1), (10, 6)]).await;

    let err = create_order(&store, &from_cart("amina", PaymentMethod::Cod), &Settings::default(), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InsufficientStock { item_id: 10, .. }));
    assert!(store.recent_orders(None, 10).await.unwrap().is_empty());
    assert_eq!(store.menu_item(10).await.unwrap().stock, 5);
    assert_eq!(store.menu_item(11).await.unwrap().stock, 5);
    assert_eq!(store.cart_lines("amina").await.unwrap().len(), 2);
}

#[tokio::test]
async fn mixed_supplier_cart_is_rejected() {
    let store = seeded_store().await;
    fill_cart(&store, "amina", &[(10, 1), (20, 1)]).await;

    let err = create_order(&store, &from_cart("amina", PaymentMethod::Cod), &Settings::default(), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::MixedSupplier { item_id: 20, supplier_id: SUPPLIER, .. }));
    assert_eq!(store.cart_lines("amina").await.unwrap().len(), 2);
    assert_eq!(store.menu_item(10).await.unwrap().stock, 5);
}

#[tokio::test]
async fn empty_cart_and_unknown_supplier() {
    let store = seeded_store().await;
    let settings = Settings::default();

    let err = create_order(&store, &from_cart("amina", PaymentMethod::Cod), &settings, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyOrder));

    fill_cart(&store, "amina", &[(10, 1)]).await;
    let mut checkout = from_cart("amina", PaymentMethod::Cod);
    checkout.supplier_id = Some(999);
    let err = create_order(&store, &checkout, &settings, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(store.cart_lines("amina").await.unwrap().len(), 1);
}

#[tokio::test]
async fn explicit_items_consume_only_listed_cart_lines() {
    let store = seeded_store().await;
    fill_cart(&store, "amina", &[(10, 2), (11, 1)]).await;
    let line_10 = store.cart_lines("amina").await.unwrap()[0].clone();

    let mut checkout = from_cart("amina", PaymentMethod::Cod);
    checkout.items = Some(vec![WantedLine {
        menu_item_id: 10,
        quantity: 2,
        cart_line_id: Some(line_10.id),
    }]);

    let created = create_order(&store, &checkout, &Settings::default(), Utc::now()).await.unwrap();
    assert_eq!(created.order.total, 1200);

    let left = store.cart_lines("amina").await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].menu_item_id, 11);
}

#[tokio::test]
async fn checkout_prices_from_catalog_not_cart() {
    let store = seeded_store().await;
    fill_cart(&store, "amina", &[(10, 2)]).await;
    store.set_menu_price(10, 650).await;

    let created = create_order(&store, &from_cart("amina", PaymentMethod::Cod), &Settings::default(), Utc::now())
        .await
        .unwrap();
    assert_eq!(created.items[0].unit_price, 650);
    assert_eq!(created.order.total, 1300 + 200);
}

#[tokio::test]
async fn order_snapshot_survives_price_changes() {
    let store = seeded_store().await;
    fill_cart(&store, "amina", &[(10, 2), (11, 1)]).await;
    let created = create_order(&store, &from_cart("amina", PaymentMethod::Cod), &Settings::default(), Utc::now())
        .await
        .unwrap();

    store.set_menu_price(10, 9_999).await;
    store.set_menu_price(11, 1).await;

    let order = store.order(created.order.id).await.unwrap().unwrap();
    let items = store.order_items(&[order.id]).await.unwrap();
    assert_eq!(order.total, 1500);
    assert_eq!(items.iter().map(|i| i.subtotal).sum::<i64>() + order.delivery_fee, order.total);
}

#[tokio::test]
async fn stale_cart_lines_are_not_ordered() {
    let store = seeded_store().await;
    let cart = CartStore::new(&store, Duration::hours(48));
    let now = Utc::now();
    cart.add_item("amina", 10, 1, now - Duration::hours(50)).await.unwrap();
    cart.add_item("amina", 11, 1, now).await.unwrap();

    let created = create_order(&store, &from_cart("amina", PaymentMethod::Cod), &Settings::default(), now)
        .await
        .unwrap();
    assert_eq!(created.items.len(), 1);
    assert_eq!(created.items[0].menu_item_id, 11);
    assert_eq!(store.menu_item(10).await.unwrap().stock, 5);
}

#[tokio::test]
async fn oversized_repeated_lines_are_rejected() {
    let store = seeded_store().await;
    let mut checkout = from_cart("amina", PaymentMethod::Cod);
    checkout.items = Some(
        [i32::MAX, 1]
            .map(|quantity| WantedLine {
                menu_item_id: 10,
                quantity,
                cart_line_id: None,
            })
            .to_vec(),
    );

    let err = create_order(&store, &checkout, &Settings::default(), Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(store.recent_orders(None, 10).await.unwrap().is_empty());
    assert_eq!(store.menu_item(10).await.unwrap().stock, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_unit_goes_to_exactly_one_buyer() {
    let store = Arc::new(seeded_store().await);
    store.insert_menu_item(meal(30, 450, 1, SUPPLIER)).await;

    let attempts = ["amina", "baraka"].map(|owner| {
        let store = store.clone();
        tokio::spawn(async move {
            let checkout = Checkout {
                owner: owner.to_string(),
                supplier_id: Some(SUPPLIER),
                payment_method: PaymentMethod::Cod,
                items: Some(vec![WantedLine {
                    menu_item_id: 30,
                    quantity: 1,
                    cart_line_id: None,
                }]),
                delivery_address: None,
            };
            create_order(store.as_ref(), &checkout, &Settings::default(), Utc::now()).await
        })
    });

    let mut won = 0;
    let mut lost = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => {
                assert!(e.is_conflict(), "unexpected error: {e}");
                lost += 1;
            }
        }
    }

    assert_eq!((won, lost), (1, 1));
    assert_eq!(store.menu_item(30).await.unwrap().stock, 0);
}

#[tokio::test]
async fn notification_failure_keeps_the_order() {
    let store = seeded_store().await;
    fill_cart(&store, "amina", &[(10, 1)]).await;

    let response = place_order(
        &store,
        &FailingPublisher,
        &from_cart("amina", PaymentMethod::Cod),
        &Settings::default(),
        Utc::now(),
    )
    .await
    .unwrap();

    let order = store.order(response.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, "Cod");
    assert_eq!(store.menu_item(10).await.unwrap().stock, 4);
}

#[tokio::test]
async fn quotes_group_cart_by_supplier() {
    let store = seeded_store().await;
    fill_cart(&store, "amina", &[(10, 2), (11, 1), (20, 1)]).await;

    let quotes = supplier_quotes(&store, "amina", Duration::hours(48), Utc::now()).await.unwrap();
    assert_eq!(quotes.len(), 2);

    let mama = quotes.iter().find(|q| q.id == SUPPLIER).unwrap();
    assert_eq!((mama.items_total, mama.delivery_fee, mama.total), (1300, 200, 1500));
    assert_eq!(mama.eta, "20-40 minutes");

    let chips = quotes.iter().find(|q| q.id == OTHER_SUPPLIER).unwrap();
    assert_eq!(chips.total, 850);

    assert!(supplier_quotes(&store, "nobody", Duration::hours(48), Utc::now())
        .await
        .unwrap()
        .is_empty());
}
