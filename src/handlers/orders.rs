use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response};
use crate::handlers::identity::{AdminUser, CurrentUser};
use crate::services::checkout::CheckoutRequest;
use crate::services::payment_webhook::{WebhookOutcome, SIGNATURE_HEADER};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// Places a cash-on-delivery order from the caller's cart.
#[utoipa::path(
    post,
    path = "/api/order/cash-on-delivery",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created"),
        (status = 400, description = "Invalid request or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart line, product or address not found", body = crate::errors::ErrorResponse),
        (status = 503, description = "Timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cash_on_delivery(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .checkout
        .cash_on_delivery(user.user_id, request)
        .await?;
    Ok(created_response(order))
}

/// Opens a hosted payment session for the caller's cart.
#[utoipa::path(
    post,
    path = "/api/order/create-payment-session",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session with redirect url"),
        (status = 400, description = "Invalid request or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway error", body = crate::errors::ErrorResponse),
        (status = 503, description = "Online payment unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_payment_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    let session = state
        .services
        .checkout
        .create_payment_session(user.user_id, request)
        .await?;
    Ok(success_response(session))
}

/// Payment gateway callback. Only a bad signature is reported back; every
/// other failure is logged and acknowledged so the gateway stops redelivering.
#[utoipa::path(
    post,
    path = "/api/order/webhook",
    request_body = String,
    responses(
        (status = 202, description = "Event received"),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.services.payment_webhook.handle(signature, &body).await {
        Ok(WebhookOutcome::Processed(details)) => {
            info!(order_number = %details.order.order_number, "webhook produced an order");
        }
        Ok(WebhookOutcome::AlreadyProcessed) => info!("webhook replay acknowledged"),
        Ok(WebhookOutcome::Ignored) => {}
        Err(err @ ServiceError::InvalidSignature(_)) => return Err(err),
        Err(err) if err.is_transient() => {
            error!(error = %err, "webhook processing failed");
        }
        Err(err) => {
            warn!(error = %err, "webhook could not be applied");
        }
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "received": true }))).into_response())
}

#[utoipa::path(
    put,
    path = "/api/order/update-status/{order_id}",
    request_body = UpdateStatusRequest,
    params(("order_id" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Unrecognised status", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(order_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .order_status
        .transition(&order_id, &request.status, Some(admin.user_id))
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/order/details/{order_id}",
    params(("order_id" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order with items and status history"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn order_details(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
) -> Result<Response, ServiceError> {
    let details = state
        .services
        .orders
        .get_order(&order_id, user.viewer())
        .await?;
    Ok(success_response(details))
}

#[utoipa::path(
    get,
    path = "/api/order/order-list",
    responses((status = 200, description = "The caller's orders, newest first")),
    tag = "Orders"
)]
pub async fn order_list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Response, ServiceError> {
    let orders = state.services.orders.list_for_user(user.user_id).await?;
    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/order/all",
    responses(
        (status = 200, description = "Every order, newest first"),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn all_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Response, ServiceError> {
    let orders = state.services.orders.list_all().await?;
    Ok(success_response(orders))
}
