mod common;

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{checkout_completed_event, json_body, TestApp, WEBHOOK_SECRET};
use mockall::mock;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use storefront_orders::{
    entities::order,
    errors::ServiceError,
    models::CheckoutQuote,
    services::cart_snapshot::CartSnapshotResolver,
    services::order_factory::{NewOrder, OrderFactory, PaymentDetails},
    services::payment_gateway::{CheckoutSession, CheckoutSessionRequest, PaymentGateway},
    services::payment_webhook::sign_payload,
};
use uuid::Uuid;

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
        async fn create_checkout_session(
            &self,
            request: CheckoutSessionRequest,
        ) -> Result<CheckoutSession, ServiceError>;
    }
}

async fn orders_with_payment(app: &TestApp, payment_id: &str) -> u64 {
    order::Entity::find()
        .filter(order::Column::PaymentId.eq(payment_id))
        .count(app.db())
        .await
        .unwrap()
}

#[tokio::test]
async fn replayed_webhook_creates_exactly_one_order() {
    let app = TestApp::new().await;
    let product = app.seed_simple_product("Desk Mat", dec!(25), 5, dec!(0)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 2).await;

    let quote = app.quote_for(user, address.id).await;
    let event = checkout_completed_event("pi_123", &quote);

    let first = app.deliver_webhook(&event).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(first).await, json!({ "received": true }));

    let second = app.deliver_webhook(&event).await;
    assert_eq!(second.status(), StatusCode::ACCEPTED);

    assert_eq!(orders_with_payment(&app, "pi_123").await, 1);
    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.product_stock(product.id).await, 3);
    assert!(app.cart_lines(user).await.is_empty());

    let paid = order::Entity::find()
        .filter(order::Column::PaymentId.eq("pi_123"))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paid.payment_status, "PAID");
    assert_eq!(paid.total, dec!(50));
}

#[tokio::test]
async fn concurrent_deliveries_of_one_payment_decrement_once() {
    let app = TestApp::new().await;
    let product = app.seed_simple_product("Poster", dec!(10), 4, dec!(0)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 1).await;

    let quote = app.quote_for(user, address.id).await;
    let event = checkout_completed_event("pi_race", &quote);

    let (a, b, c) = tokio::join!(
        app.deliver_webhook(&event),
        app.deliver_webhook(&event),
        app.deliver_webhook(&event),
    );
    for response in [a, b, c] {
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    assert_eq!(orders_with_payment(&app, "pi_race").await, 1);
    assert_eq!(app.product_stock(product.id).await, 3);
}

#[tokio::test]
async fn invalid_signature_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let product = app.seed_simple_product("Clock", dec!(35), 2, dec!(0)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 1).await;

    let quote = app.quote_for(user, address.id).await;
    let body = serde_json::to_vec(&checkout_completed_event("pi_forged", &quote)).unwrap();
    let forged = sign_payload("whsec_wrong", Utc::now().timestamp(), &body).unwrap();

    let response = app.deliver_raw_webhook(body.clone(), &forged).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp() - 3_600, &body).unwrap();
    let response = app.deliver_raw_webhook(body, &stale).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.product_stock(product.id).await, 2);
    assert_eq!(app.cart_lines(user).await.len(), 1);
}

#[tokio::test]
async fn webhook_replays_the_frozen_quote_not_current_prices() {
    let app = TestApp::new().await;
    let product = app.seed_simple_product("Vase", dec!(40), 3, dec!(25)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 1).await;

    let quote = app.quote_for(user, address.id).await;

    // catalog changes after the shopper paid
    let mut repriced: storefront_orders::entities::product::ActiveModel = product.clone().into();
    repriced.price = sea_orm::Set(Some(dec!(100)));
    repriced.discount = sea_orm::Set(dec!(0));
    sea_orm::ActiveModelTrait::update(repriced, app.db()).await.unwrap();

    let response = app
        .deliver_webhook(&checkout_completed_event("pi_frozen", &quote))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let paid = order::Entity::find()
        .filter(order::Column::PaymentId.eq("pi_frozen"))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paid.total, dec!(30));
}

#[tokio::test]
async fn business_failures_are_acknowledged_but_create_nothing() {
    let app = TestApp::new().await;
    let product = app.seed_simple_product("Rug", dec!(80), 1, dec!(0)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 1).await;
    let quote = app.quote_for(user, address.id).await;

    // someone else bought the last one in the meantime
    let other = Uuid::new_v4();
    let other_address = app.seed_address(other).await;
    app.seed_cart_line(other, product.id, None, 1).await;
    let response = app
        .as_shopper(
            Method::POST,
            "/api/order/cash-on-delivery",
            other,
            Some(json!({ "addressId": other_address.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .deliver_webhook(&checkout_completed_event("pi_late", &quote))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(orders_with_payment(&app, "pi_late").await, 0);
    assert_eq!(app.product_stock(product.id).await, 0);

    let missing_metadata = json!({
        "id": "evt_no_meta",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_no_meta", "status": "succeeded" } }
    });
    let response = app.deliver_webhook(&missing_metadata).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let unrelated = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1" } }
    });
    let response = app.deliver_webhook(&unrelated).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn payment_session_embeds_a_replayable_quote() {
    let captured: Arc<Mutex<Option<CheckoutQuote>>> = Arc::new(Mutex::new(None));
    let sink = captured.clone();

    let mut gateway = MockGateway::new();
    gateway
        .expect_create_checkout_session()
        .times(1)
        .returning(move |request| {
            *sink.lock().unwrap() = Some(request.quote.clone());
            Ok(CheckoutSession {
                id: "cs_test_42".into(),
                url: "https://checkout.example.com/cs_test_42".into(),
            })
        });

    let app = TestApp::with_gateway(Arc::new(gateway)).await;
    let (product, variants) = app
        .seed_variant_product("Rain Jacket", dec!(10), &[("L", dec!(100), 5)])
        .await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, Some(variants[0].id), 2)
        .await;

    let response = app
        .as_shopper(
            Method::POST,
            "/api/order/create-payment-session",
            user,
            Some(json!({ "addressId": address.id, "totalAmt": "180" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["url"], "https://checkout.example.com/cs_test_42");

    // nothing is reserved until payment is confirmed
    assert_eq!(app.variant_stock(variants[0].id).await, 5);
    assert_eq!(app.cart_lines(user).await.len(), 1);

    let quote = captured.lock().unwrap().clone().expect("quote sent to gateway");
    assert_eq!(quote.total, dec!(180));
    assert_eq!(quote.lines[0].unit_price, dec!(90));

    let response = app
        .deliver_webhook(&checkout_completed_event(
            "pi_session",
            &quote.encode().unwrap(),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(orders_with_payment(&app, "pi_session").await, 1);
    assert_eq!(app.variant_stock(variants[0].id).await, 3);
    assert!(app.cart_lines(user).await.is_empty());
}

#[tokio::test]
async fn payment_session_checks_stock_before_calling_the_gateway() {
    let mut gateway = MockGateway::new();
    gateway.expect_create_checkout_session().times(0);

    let app = TestApp::with_gateway(Arc::new(gateway)).await;
    let product = app.seed_simple_product("Kettle", dec!(60), 1, dec!(0)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 3).await;

    let response = app
        .as_shopper(
            Method::POST,
            "/api/order/create-payment-session",
            user,
            Some(json!({ "addressId": address.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("only 1 left of Kettle"));
}

#[tokio::test]
async fn payment_session_without_gateway_is_unavailable() {
    let app = TestApp::new().await;
    let product = app.seed_simple_product("Fan", dec!(70), 3, dec!(0)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 1).await;

    let response = app
        .as_shopper(
            Method::POST,
            "/api/order/create-payment-session",
            user,
            Some(json!({ "addressId": address.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn second_order_for_a_payment_id_is_a_duplicate_not_a_stock_failure() {
    let app = TestApp::new().await;
    let product = app.seed_simple_product("Poster", dec!(10), 1, dec!(0)).await;
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 1).await;

    let lines = CartSnapshotResolver::new(app.state.db.clone())
        .resolve(user)
        .await
        .unwrap();
    let factory = OrderFactory::new(app.state.db.clone(), app.state.event_sender.clone());
    let order_for = |lines| NewOrder {
        user_id: user,
        delivery_address_id: address.id,
        lines,
        payment: PaymentDetails::paid("pi_dup", "PAID"),
    };

    factory.create_order(order_for(lines.clone())).await.unwrap();
    let second = factory.create_order(order_for(lines)).await;
    assert_matches!(second, Err(ServiceError::DuplicateOrder(id)) if id == "pi_dup");

    assert_eq!(app.product_stock(product.id).await, 0);
    assert_eq!(orders_with_payment(&app, "pi_dup").await, 1);
}
