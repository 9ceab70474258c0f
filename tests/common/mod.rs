#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use serde_json::{json, Value};
use storefront_orders::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{address, cart_item, order, product, product_variant},
    events::{self, EventSender},
    models::CheckoutQuote,
    services::{
        cart_snapshot::CartSnapshotResolver,
        payment_gateway::{PaymentGateway, UnconfiguredGateway},
        payment_webhook::sign_payload,
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_tests";

/// Helper harness for spinning up the full router on an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Test application with online payment disabled.
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(UnconfiguredGateway)).await
    }

    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, Arc::new(event_sender), gateway);
        let router = storefront_orders::build_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    /// Send a request with optional caller identity headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<Uuid>,
        admin: bool,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        if admin {
            builder = builder.header("x-user-role", "ADMIN");
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn as_shopper(
        &self,
        method: Method,
        uri: &str,
        user: Uuid,
        body: Option<Value>,
    ) -> Response {
        self.request(method, uri, body, Some(user), false).await
    }

    pub async fn as_admin(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, Some(Uuid::new_v4()), true)
            .await
    }

    /// Posts `event` to the webhook route, signed with the test secret.
    pub async fn deliver_webhook(&self, event: &Value) -> Response {
        let body = serde_json::to_vec(event).expect("serialize webhook event");
        let signature =
            sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), &body).expect("sign payload");
        self.deliver_raw_webhook(body, &signature).await
    }

    pub async fn deliver_raw_webhook(&self, body: Vec<u8>, signature: &str) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/order/webhook")
            .header("content-type", "application/json")
            .header("stripe-signature", signature)
            .body(Body::from(body))
            .expect("failed to build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    pub async fn seed_simple_product(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        discount: Decimal,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            image: Set(Some(format!("https://cdn.example.com/{}.png", name))),
            price: Set(Some(price)),
            stock: Set(Some(stock)),
            has_variations: Set(false),
            discount: Set(discount),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed simple product")
    }

    /// Seeds a variant product; `sizes` are `(size, price, stock)`.
    pub async fn seed_variant_product(
        &self,
        name: &str,
        discount: Decimal,
        sizes: &[(&str, Decimal, i32)],
    ) -> (product::Model, Vec<product_variant::Model>) {
        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            image: Set(None),
            price: Set(None),
            stock: Set(None),
            has_variations: Set(true),
            discount: Set(discount),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed variant product");

        let mut variants = Vec::new();
        for (position, (size, price, stock)) in sizes.iter().enumerate() {
            let variant = product_variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product.id),
                size: Set(size.to_string()),
                price: Set(*price),
                stock: Set(*stock),
                position: Set(position as i32),
            }
            .insert(self.db())
            .await
            .expect("seed product variant");
            variants.push(variant);
        }
        (product, variants)
    }

    pub async fn seed_address(&self, user_id: Uuid) -> address::Model {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            address_line: Set("12 Harbour Road".to_string()),
            city: Set("Kochi".to_string()),
            state: Set(Some("Kerala".to_string())),
            pincode: Set(Some("682001".to_string())),
            country: Set("IN".to_string()),
            mobile: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed address")
    }

    /// Inserts a cart line directly, bypassing the add-to-cart validation.
    pub async fn seed_cart_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variation_id: Option<Uuid>,
        quantity: i32,
    ) -> cart_item::Model {
        let now = Utc::now();
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            variation_id: Set(variation_id),
            selected_size: Set(None),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed cart line")
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.db())
            .await
            .expect("load product")
            .and_then(|p| p.stock)
            .expect("product has stock")
    }

    pub async fn variant_stock(&self, variation_id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(variation_id)
            .one(self.db())
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock
    }

    pub async fn cart_lines(&self, user_id: Uuid) -> Vec<cart_item::Model> {
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(self.db())
            .await
            .expect("load cart")
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(self.db())
            .await
            .expect("count orders")
    }

    /// Freezes the user's current cart into an encoded quote, as the
    /// payment-session route would.
    pub async fn quote_for(&self, user_id: Uuid, address_id: Uuid) -> String {
        let lines = CartSnapshotResolver::new(self.state.db.clone())
            .resolve(user_id)
            .await
            .expect("resolve cart");
        CheckoutQuote::new(user_id, address_id, lines, "usd")
            .encode()
            .expect("encode quote")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn checkout_completed_event(payment_intent: &str, quote: &str) -> Value {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": format!("cs_test_{}", Uuid::new_v4().simple()),
                "payment_intent": payment_intent,
                "payment_status": "paid",
                "metadata": { "checkout_quote": quote }
            }
        }
    })
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
