//! Order Factory
//!
//! Turns resolved lines into a persisted order. The order row, stock
//! decrements, line items, the first status-history entry and clearing of the
//! originating cart lines all happen in one database transaction: either every
//! effect is committed or none is visible.
//!
//! The order row is written first so a second attempt for the same payment id
//! fails on the unique index before touching any stock.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::{cart_item, order, order_item, order_status_history};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::{checkout::sub_total, OrderStatus, ResolvedLine};
use crate::services::inventory_ledger::{InventoryLedger, StockTarget};
use crate::services::order_query::OrderDetails;

pub const CASH_ON_DELIVERY: &str = "CASH ON DELIVERY";

/// How the order was (or will be) paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDetails {
    /// Payment intent id, the idempotency key for paid orders
    pub payment_id: Option<String>,
    pub payment_status: String,
}

impl PaymentDetails {
    pub fn cash_on_delivery() -> Self {
        Self {
            payment_id: None,
            payment_status: CASH_ON_DELIVERY.to_string(),
        }
    }

    pub fn paid(payment_id: impl Into<String>, payment_status: impl Into<String>) -> Self {
        Self {
            payment_id: Some(payment_id.into()),
            payment_status: payment_status.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub delivery_address_id: Uuid,
    pub lines: Vec<ResolvedLine>,
    pub payment: PaymentDetails,
}

#[derive(Clone)]
pub struct OrderFactory {
    db: Arc<DatabaseConnection>,
    ledger: InventoryLedger,
    event_sender: Arc<EventSender>,
}

impl OrderFactory {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            ledger: InventoryLedger::new(),
            event_sender,
        }
    }

    /// Creates an order from `new_order`, all or nothing.
    ///
    /// Fails with `InsufficientStock` naming the first line that could not be
    /// fulfilled, or `DuplicateOrder` when an order already holds the payment id.
    #[instrument(
        skip(self, new_order),
        fields(
            user_id = %new_order.user_id,
            lines = new_order.lines.len(),
            payment_id = new_order.payment.payment_id.as_deref().unwrap_or("cod"),
        )
    )]
    pub async fn create_order(&self, new_order: NewOrder) -> Result<OrderDetails, ServiceError> {
        validate_lines(&new_order.lines)?;

        let started = Instant::now();
        let order_number = generate_order_number();
        let txn = self.db.begin().await?;

        let (details, cleared) = match self.write_order(&txn, &order_number, &new_order).await {
            Ok(written) => written,
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "rollback failed");
                }
                return Err(err);
            }
        };

        txn.commit().await?;

        metrics::increment_counter(metrics::ORDERS_CREATED);
        metrics::observe_histogram(
            metrics::ORDER_CREATION_SECONDS,
            started.elapsed().as_secs_f64(),
        );
        info!(
            order_id = %details.order.id,
            order_number = %details.order.order_number,
            total = %details.order.total,
            "order created"
        );

        self.event_sender.send_or_log(Event::OrderPlaced {
            order_id: details.order.id,
            order_number: details.order.order_number.clone(),
            user_id: details.order.user_id,
            total: details.order.total,
            payment_id: details.order.payment_id.clone(),
        });
        if cleared > 0 {
            self.event_sender.send_or_log(Event::CartCleared {
                user_id: details.order.user_id,
                lines: cleared,
            });
        }

        Ok(details)
    }

    async fn write_order(
        &self,
        txn: &DatabaseTransaction,
        order_number: &str,
        new_order: &NewOrder,
    ) -> Result<(OrderDetails, u64), ServiceError> {
        let now = Utc::now();
        let sub_total = sub_total(&new_order.lines);
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.to_string()),
            user_id: Set(new_order.user_id),
            payment_id: Set(new_order.payment.payment_id.clone()),
            payment_status: Set(new_order.payment.payment_status.clone()),
            status: Set(OrderStatus::Pending),
            delivery_address_id: Set(new_order.delivery_address_id),
            sub_total: Set(sub_total),
            total: Set(sub_total),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(|e| map_insert_error(e, &new_order.payment))?;

        for line in &new_order.lines {
            let target = StockTarget::for_line(line.product_id, line.variation_id);
            self.ledger.decrement(txn, target, line.quantity).await?;
        }

        let mut items = Vec::with_capacity(new_order.lines.len());
        for (position, line) in new_order.lines.iter().enumerate() {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                image: Set(line.image.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                variation_id: Set(line.variation_id),
                selected_size: Set(line.selected_size.clone()),
                position: Set(position as i32),
            }
            .insert(txn)
            .await?;
            items.push(item);
        }

        let history = order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            from_status: Set(None),
            to_status: Set(OrderStatus::Pending),
            changed_by: Set(None),
            changed_at: Set(now),
        }
        .insert(txn)
        .await?;

        // Cart lines go last, only once the order rows exist.
        let cart_line_ids: Vec<Uuid> = new_order
            .lines
            .iter()
            .filter_map(|line| line.cart_line_id)
            .collect();
        let cleared = if cart_line_ids.is_empty() {
            0
        } else {
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::UserId.eq(new_order.user_id))
                .filter(cart_item::Column::Id.is_in(cart_line_ids))
                .exec(txn)
                .await?
                .rows_affected
        };
        debug!(cleared, "cart lines cleared");

        Ok((
            OrderDetails {
                order,
                items,
                history: vec![history],
            },
            cleared,
        ))
    }
}

fn validate_lines(lines: &[ResolvedLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "an order needs at least one line".into(),
        ));
    }
    if let Some(line) = lines.iter().find(|line| line.quantity < 1) {
        return Err(ServiceError::ValidationError(format!(
            "quantity for {} must be at least 1",
            line.name
        )));
    }
    Ok(())
}

fn map_insert_error(err: DbErr, payment: &PaymentDetails) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            warn!(%detail, "order uniqueness violated");
            ServiceError::DuplicateOrder(
                payment
                    .payment_id
                    .clone()
                    .unwrap_or_else(|| "order number collision".to_string()),
            )
        }
        _ => ServiceError::DatabaseError(err),
    }
}

/// Public order id, e.g. `ORD-9f1c...`
pub fn generate_order_number() -> String {
    format!("ORD-{}", Uuid::new_v4().simple())
}
