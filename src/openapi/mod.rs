use axum::{response::Json, routing::get, Router};
use utoipa::OpenApi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Orders API",
        version = "1.0.0",
        description = r#"
Checkout, payment confirmation and order administration for the storefront.

## Identity

Requests are authenticated upstream. The caller is passed as `x-user-id`
(UUID); staff additionally send `x-user-role: ADMIN`.

## Errors

```json
{
  "error": "Bad Request",
  "message": "Insufficient stock: only 1 left of Linen Shirt (size L), requested 2",
  "request_id": "1f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "Orders", description = "Checkout, payment webhook and order endpoints"),
        (name = "Cart", description = "Cart maintenance")
    ),
    paths(
        crate::handlers::orders::cash_on_delivery,
        crate::handlers::orders::create_payment_session,
        crate::handlers::orders::payment_webhook,
        crate::handlers::orders::update_status,
        crate::handlers::orders::order_details,
        crate::handlers::orders::order_list,
        crate::handlers::orders::all_orders,
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::get_cart,
        crate::handlers::cart::update_quantity,
        crate::handlers::cart::remove_item,
    ),
    components(schemas(
        crate::services::checkout::CheckoutRequest,
        crate::services::cart::AddToCartInput,
        crate::services::cart::UpdateQuantityInput,
        crate::services::cart::RemoveItemInput,
        crate::handlers::orders::UpdateStatusRequest,
        crate::models::OrderStatus,
        crate::models::ResolvedLine,
        crate::errors::ErrorResponse,
    ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// `GET /api-docs/openapi.json`
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(openapi_json))
}
