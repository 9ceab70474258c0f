mod common;

use axum::http::{Method, StatusCode};
use common::{json_body, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

/// Places a cash-on-delivery order for `user` and returns its order number.
async fn place_order(app: &TestApp, user: Uuid, name: &str) -> String {
    let product = app.seed_simple_product(name, dec!(10), 10, dec!(0)).await;
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 1).await;

    let response = app
        .as_shopper(
            Method::POST,
            "/api/order/cash-on-delivery",
            user,
            Some(json!({ "addressId": address.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["data"]["order_number"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn status_of(app: &TestApp, user: Uuid, order_number: &str) -> String {
    let response = app
        .as_shopper(
            Method::GET,
            &format!("/api/order/details/{}", order_number),
            user,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["data"]["status"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn admin_moves_order_through_statuses_case_insensitively() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let order_number = place_order(&app, user, "Teapot").await;

    let response = app
        .as_admin(
            Method::PUT,
            &format!("/api/order/update-status/{}", order_number),
            Some(json!({ "status": "PROCESSING" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "processing");

    let response = app
        .as_shopper(
            Method::GET,
            &format!("/api/order/details/{}", order_number),
            user,
            None,
        )
        .await;
    let details = json_body(response).await;
    let history = details["data"]["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0]["from_status"].is_null());
    assert_eq!(history[0]["to_status"], "pending");
    assert_eq!(history[1]["from_status"], "pending");
    assert_eq!(history[1]["to_status"], "processing");
    assert!(!history[1]["changed_by"].is_null());

    // terminal statuses can still be left
    for status in ["delivered", "Pending"] {
        let response = app
            .as_admin(
                Method::PUT,
                &format!("/api/order/update-status/{}", order_number),
                Some(json!({ "status": status })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(status_of(&app, user, &order_number).await, "pending");
}

#[tokio::test]
async fn unknown_status_is_rejected_and_order_unchanged() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let order_number = place_order(&app, user, "Saucer").await;

    let response = app
        .as_admin(
            Method::PUT,
            &format!("/api/order/update-status/{}", order_number),
            Some(json!({ "status": "shipped" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(status_of(&app, user, &order_number).await, "pending");
}

#[tokio::test]
async fn status_update_needs_an_existing_order_and_an_admin() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let order_number = place_order(&app, user, "Ladle").await;

    let response = app
        .as_admin(
            Method::PUT,
            "/api/order/update-status/ORD-DOES-NOT-EXIST",
            Some(json!({ "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .as_shopper(
            Method::PUT,
            &format!("/api/order/update-status/{}", order_number),
            user,
            Some(json!({ "status": "cancelled" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(status_of(&app, user, &order_number).await, "pending");
}

#[tokio::test]
async fn cancelling_does_not_restock() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_simple_product("Whisk", dec!(6), 4, dec!(0)).await;
    let address = app.seed_address(user).await;
    app.seed_cart_line(user, product.id, None, 3).await;

    let response = app
        .as_shopper(
            Method::POST,
            "/api/order/cash-on-delivery",
            user,
            Some(json!({ "addressId": address.id })),
        )
        .await;
    let order_number = json_body(response).await["data"]["order_number"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .as_admin(
            Method::PUT,
            &format!("/api/order/update-status/{}", order_number),
            Some(json!({ "status": "cancelled" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.product_stock(product.id).await, 1);
}

#[tokio::test]
async fn shoppers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let first = place_order(&app, alice, "Spoon").await;
    let second = place_order(&app, alice, "Fork").await;
    let bobs = place_order(&app, bob, "Knife").await;

    let response = app
        .as_shopper(
            Method::GET,
            &format!("/api/order/details/{}", bobs),
            alice,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .as_shopper(Method::GET, "/api/order/order-list", alice, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_body(response).await;
    let numbers: Vec<&str> = listed["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|order| order["order_number"].as_str().unwrap())
        .collect();
    assert_eq!(numbers.len(), 2);
    assert!(numbers.contains(&first.as_str()));
    assert!(numbers.contains(&second.as_str()));
    assert!(!numbers.contains(&bobs.as_str()));

    let orders = listed["data"].as_array().unwrap();
    assert_eq!(orders[0]["items"].as_array().unwrap().len(), 1);

    // admins read any order
    let response = app
        .as_admin(Method::GET, &format!("/api/order/details/{}", bobs), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn all_orders_is_admin_only() {
    let app = TestApp::new().await;
    let alice = Uuid::new_v4();
    place_order(&app, alice, "Plate").await;
    place_order(&app, Uuid::new_v4(), "Bowl").await;

    let response = app
        .as_shopper(Method::GET, "/api/order/all", alice, None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.as_admin(Method::GET, "/api/order/all", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"].as_array().unwrap().len(), 2);
}
