use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::address;
use crate::errors::{ServiceError, StockShortfall};
use crate::metrics;
use crate::models::{checkout::sub_total, CheckoutQuote, ResolvedLine};
use crate::services::cart_snapshot::CartSnapshotResolver;
use crate::services::inventory_ledger::{Availability, InventoryLedger, StockTarget};
use crate::services::order_factory::{NewOrder, OrderFactory, PaymentDetails};
use crate::services::order_query::OrderDetails;
use crate::services::payment_gateway::{CheckoutSession, CheckoutSessionRequest, PaymentGateway};
use crate::services::with_timeout;

/// Body of both checkout routes.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    /// Cart line ids to check out; the whole cart when empty
    #[serde(default)]
    pub list_items: Vec<Uuid>,
    #[serde(rename = "addressId")]
    pub address_id: Uuid,
    /// Total the client displayed; rejected when it no longer matches
    #[serde(rename = "totalAmt", default)]
    #[validate(custom = "validate_amount")]
    pub total_amt: Option<Decimal>,
    #[serde(rename = "subTotalAmt", default)]
    #[validate(custom = "validate_amount")]
    pub sub_total_amt: Option<Decimal>,
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() {
        return Err(ValidationError::new("negative_amount"));
    }
    Ok(())
}

/// Settings the checkout flow needs from configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    resolver: CartSnapshotResolver,
    ledger: InventoryLedger,
    factory: OrderFactory,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        factory: OrderFactory,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            resolver: CartSnapshotResolver::new(db.clone()),
            db,
            ledger: InventoryLedger::new(),
            factory,
            gateway,
            settings,
        }
    }

    /// Places a cash-on-delivery order synchronously.
    #[instrument(skip(self, request), fields(user_id = %user_id, address_id = %request.address_id))]
    pub async fn cash_on_delivery(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<OrderDetails, ServiceError> {
        request.validate()?;
        with_timeout(self.settings.timeout, "cash on delivery checkout", async {
            let lines = self.prepare(user_id, &request).await?;
            self.factory
                .create_order(NewOrder {
                    user_id,
                    delivery_address_id: request.address_id,
                    lines,
                    payment: PaymentDetails::cash_on_delivery(),
                })
                .await
        })
        .await
    }

    /// Freezes the resolved cart into a quote and opens a hosted payment
    /// session for it. Nothing is decremented until the payment is confirmed.
    #[instrument(skip(self, request), fields(user_id = %user_id, address_id = %request.address_id))]
    pub async fn create_payment_session(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        request.validate()?;
        with_timeout(self.settings.timeout, "payment session", async {
            let lines = self.prepare(user_id, &request).await?;
            self.ensure_available(&lines).await?;

            let quote = CheckoutQuote::new(
                user_id,
                request.address_id,
                lines,
                self.settings.currency.clone(),
            );
            let session = self
                .gateway
                .create_checkout_session(CheckoutSessionRequest {
                    quote,
                    success_url: self.settings.success_url.clone(),
                    cancel_url: self.settings.cancel_url.clone(),
                })
                .await?;
            info!(session_id = %session.id, "payment session opened");
            Ok(session)
        })
        .await
    }

    /// Resolves the requested lines against the live catalog and checks the
    /// address and client totals.
    async fn prepare(
        &self,
        user_id: Uuid,
        request: &CheckoutRequest,
    ) -> Result<Vec<ResolvedLine>, ServiceError> {
        let lines = self
            .resolver
            .resolve_lines(user_id, &request.list_items)
            .await?;

        address::Entity::find_by_id(request.address_id)
            .filter(address::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("address {} not found", request.address_id))
            })?;

        check_client_totals(&lines, request)?;
        Ok(lines)
    }

    async fn ensure_available(&self, lines: &[ResolvedLine]) -> Result<(), ServiceError> {
        for line in lines {
            let target = StockTarget::for_line(line.product_id, line.variation_id);
            if let Availability::Insufficient { available } = self
                .ledger
                .check_availability(&*self.db, target, line.quantity)
                .await?
            {
                metrics::increment_counter(metrics::CHECKOUT_INSUFFICIENT_STOCK);
                return Err(ServiceError::InsufficientStock(StockShortfall {
                    product_id: line.product_id,
                    product_name: line.name.clone(),
                    variation_id: line.variation_id,
                    selected_size: line.selected_size.clone(),
                    requested: line.quantity,
                    available,
                }));
            }
        }
        Ok(())
    }
}

fn check_client_totals(lines: &[ResolvedLine], request: &CheckoutRequest) -> Result<(), ServiceError> {
    let server_total = sub_total(lines);
    for (label, claimed) in [
        ("subTotalAmt", request.sub_total_amt),
        ("totalAmt", request.total_amt),
    ] {
        if let Some(claimed) = claimed {
            if claimed.round_dp(2) != server_total.round_dp(2) {
                return Err(ServiceError::ValidationError(format!(
                    "{} {} does not match current cart total {}; refresh the cart",
                    label, claimed, server_total
                )));
            }
        }
    }
    Ok(())
}
