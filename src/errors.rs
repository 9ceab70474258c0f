use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Insufficient stock: only 1 left of Linen Shirt (size L), requested 2")]
    pub message: String,
    /// Structured detail for business errors (e.g. the stock shortfall as JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// Which product/variant could not be fulfilled, and how much was left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product_id: Uuid,
    pub product_name: String,
    pub variation_id: Option<Uuid>,
    pub selected_size: Option<String>,
    pub requested: i32,
    pub available: i32,
}

impl fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "only {} left of {}", self.available, self.product_name)?;
        match (&self.selected_size, self.variation_id) {
            (Some(size), _) => write!(f, " (size {})", size)?,
            (None, Some(variation_id)) => write!(f, " (variation {})", variation_id)?,
            (None, None) => {}
        }
        write!(f, ", requested {}", self.requested)
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(StockShortfall),

    #[error("Variation required: {0}")]
    VariationRequired(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    pub fn product_not_found(product_id: Uuid) -> Self {
        ServiceError::NotFound(format!("product {} no longer exists", product_id))
    }

    pub fn variation_not_found(product_id: Uuid, variation_id: Uuid) -> Self {
        ServiceError::NotFound(format!(
            "variation {} no longer exists on product {}",
            variation_id, product_id
        ))
    }

    pub fn order_not_found(order_id: &str) -> Self {
        ServiceError::NotFound(format!("order {} not found", order_id))
    }

    /// True for storage/infrastructure failures a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::Timeout(_) | Self::ServiceUnavailable(_)
        )
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidStatus(_)
            | Self::InsufficientStock(_)
            | Self::VariationRequired(_)
            | Self::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DuplicateOrder(_) => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) | Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Infrastructure and signature failures get generic messages.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidSignature(_) => "Invalid webhook signature".to_string(),
            Self::Timeout(_) => "Request timed out, please retry".to_string(),
            Self::ExternalServiceError(_) => "Payment gateway error".to_string(),
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::InsufficientStock(shortfall) => serde_json::to_string(shortfall).ok(),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() || matches!(self, Self::ExternalServiceError(_)) {
            error!(error = %self, status = status.as_u16(), "request failed");
        } else if matches!(self, Self::InvalidSignature(_)) {
            warn!(error = %self, "rejected webhook delivery");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn shortfall() -> StockShortfall {
        StockShortfall {
            product_id: Uuid::nil(),
            product_name: "Linen Shirt".into(),
            variation_id: Some(Uuid::nil()),
            selected_size: Some("L".into()),
            requested: 2,
            available: 1,
        }
    }

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[tokio::test]
    async fn insufficient_stock_names_the_variant_and_available_quantity() {
        let response = ServiceError::InsufficientStock(shortfall()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            payload.message,
            "Insufficient stock: only 1 left of Linen Shirt (size L), requested 2"
        );
        let details: StockShortfall =
            serde_json::from_str(payload.details.as_deref().unwrap()).unwrap();
        assert_eq!(details, shortfall());
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidStatus("shipped".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidSignature("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::DuplicateOrder("pi_1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ExternalServiceError("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Timeout("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn service_error_response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("pool exhausted at 10.0.0.3".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::InvalidSignature("expected abc got def".into()).response_message(),
            "Invalid webhook signature"
        );
        assert_eq!(
            ServiceError::NotFound("order ORD-1 not found".into()).response_message(),
            "Not found: order ORD-1 not found"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(ServiceError::Timeout("checkout".into()).is_transient());
        assert!(ServiceError::DatabaseError(DbErr::Custom("down".into())).is_transient());
        assert!(!ServiceError::InsufficientStock(shortfall()).is_transient());
    }
}
