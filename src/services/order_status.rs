use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{order, order_status_history},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    models::OrderStatus,
};

/// Applies admin status changes. Any recognised status may follow any other;
/// inventory is never touched.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Sets the status of the order identified by its public order number.
    ///
    /// `InvalidStatus` for values outside pending/processing/delivered/cancelled
    /// (case-insensitive), `NotFound` for an unknown order.
    #[instrument(skip(self), fields(order_number = %order_number, new_status = %new_status))]
    pub async fn transition(
        &self,
        order_number: &str,
        new_status: &str,
        changed_by: Option<Uuid>,
    ) -> Result<order::Model, ServiceError> {
        let new_status = OrderStatus::parse(new_status)?;

        let txn = self.db.begin().await?;

        let current = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::order_not_found(order_number))?;

        let old_status = current.status;
        if old_status == new_status {
            txn.commit().await?;
            info!("status unchanged");
            return Ok(current);
        }
        if old_status.is_terminal() {
            warn!(%old_status, %new_status, "moving order out of a terminal status");
        }

        let now = Utc::now();
        let mut active: order::ActiveModel = current.into();
        active.status = Set(new_status);
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(updated.id),
            from_status: Set(Some(old_status)),
            to_status: Set(new_status),
            changed_by: Set(changed_by),
            changed_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        metrics::increment_counter(metrics::ORDER_STATUS_TRANSITIONS);
        info!(%old_status, %new_status, "order status updated");
        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id: updated.id,
            order_number: updated.order_number.clone(),
            old_status,
            new_status,
        });

        Ok(updated)
    }
}
