//! Storefront order fulfillment service.
//!
//! Turns shopper carts into orders without overselling: cash-on-delivery
//! checkout, hosted payment sessions confirmed by signed webhooks, and admin
//! status management.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::events::EventSender;
use crate::services::payment_gateway::PaymentGateway;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), gateway, &config);
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn message(message: &str) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.to_string()),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Shopper and admin routes, mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    let orders = Router::new()
        .route(
            "/cash-on-delivery",
            post(handlers::orders::cash_on_delivery),
        )
        .route(
            "/create-payment-session",
            post(handlers::orders::create_payment_session),
        )
        .route("/webhook", post(handlers::orders::payment_webhook))
        .route(
            "/update-status/:order_id",
            put(handlers::orders::update_status),
        )
        .route("/details/:order_id", get(handlers::orders::order_details))
        .route("/order-list", get(handlers::orders::order_list))
        .route("/all", get(handlers::orders::all_orders));

    let cart = Router::new()
        .route("/create", post(handlers::cart::add_to_cart))
        .route("/get", get(handlers::cart::get_cart))
        .route("/update-qty", put(handlers::cart::update_quantity))
        .route("/delete-cart-item", delete(handlers::cart::remove_item));

    Router::new().nest("/order", orders).nest("/cart", cart)
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// The complete application: API, health, metrics and OpenAPI document
/// behind tracing, CORS, compression, timeout and request-id layers.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(|| async { "storefront-orders up" }))
        .merge(handlers::health::health_routes())
        .merge(openapi::openapi_routes())
        .nest("/api", api_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
