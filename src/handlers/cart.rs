use axum::{extract::State, response::Response, Json};

use crate::errors::ServiceError;
use crate::handlers::common::{created_response, message_response, success_response};
use crate::handlers::identity::CurrentUser;
use crate::services::cart::{AddToCartInput, RemoveItemInput, UpdateQuantityInput};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/api/cart/create",
    request_body = AddToCartInput,
    responses(
        (status = 201, description = "Cart line added or merged"),
        (status = 400, description = "Size missing or invalid", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<AddToCartInput>,
) -> Result<Response, ServiceError> {
    let line = state.services.cart.add_item(user.user_id, input).await?;
    Ok(created_response(line))
}

#[utoipa::path(
    get,
    path = "/api/cart/get",
    responses((status = 200, description = "The caller's cart lines")),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Response, ServiceError> {
    let lines = state.services.cart.list(user.user_id).await?;
    Ok(success_response(lines))
}

#[utoipa::path(
    put,
    path = "/api/cart/update-qty",
    request_body = UpdateQuantityInput,
    responses(
        (status = 200, description = "Quantity updated"),
        (status = 404, description = "Cart line not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn update_quantity(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<UpdateQuantityInput>,
) -> Result<Response, ServiceError> {
    let line = state
        .services
        .cart
        .update_quantity(user.user_id, input)
        .await?;
    Ok(success_response(line))
}

#[utoipa::path(
    delete,
    path = "/api/cart/delete-cart-item",
    request_body = RemoveItemInput,
    responses(
        (status = 200, description = "Cart line removed"),
        (status = 404, description = "Cart line not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<RemoveItemInput>,
) -> Result<Response, ServiceError> {
    state.services.cart.remove(user.user_id, input.id).await?;
    Ok(message_response("cart line removed"))
}
