use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::ServiceError;

// Cart and checkout
pub mod cart;
pub mod cart_snapshot;
pub mod checkout;

// Inventory and order persistence
pub mod inventory_ledger;
pub mod order_factory;

// Payments
pub mod payment_gateway;
pub mod payment_webhook;

// Order reads and admin actions
pub mod order_query;
pub mod order_status;

/// Bounds `operation` by `limit`. Dropping the future on expiry drops any
/// transaction it holds, which rolls it back.
pub async fn with_timeout<T, F>(
    limit: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, limit_ms = limit.as_millis() as u64, "operation timed out");
            Err(ServiceError::Timeout(format!(
                "{} did not finish within {:?}",
                operation, limit
            )))
        }
    }
}
