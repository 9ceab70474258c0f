use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{order, order_item, order_status_history};
use crate::errors::ServiceError;

/// An order with its line items and, for detail views, its status history.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<order_status_history::Model>,
}

/// Who is reading; shoppers only see their own orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Shopper(Uuid),
    Admin,
}

#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DatabaseConnection>,
}

impl OrderQueryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_number: &str,
        viewer: Viewer,
    ) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;
        let mut query = order::Entity::find().filter(order::Column::OrderNumber.eq(order_number));
        if let Viewer::Shopper(user_id) = viewer {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        let order = query
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::order_not_found(order_number))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::Position)
            .all(db)
            .await?;
        let history = order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(order.id))
            .order_by_asc(order_status_history::Column::ChangedAt)
            .all(db)
            .await?;

        Ok(OrderDetails {
            order,
            items,
            history,
        })
    }

    /// The order holding `payment_id`, if any.
    pub async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?)
    }

    /// Orders of one user, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError> {
        self.list(Some(user_id)).await
    }

    /// Every order, newest first.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<OrderDetails>, ServiceError> {
        self.list(None).await
    }

    async fn list(&self, user_id: Option<Uuid>) -> Result<Vec<OrderDetails>, ServiceError> {
        let mut query = order::Entity::find();
        if let Some(user_id) = user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        let rows = query
            .order_by_desc(order::Column::CreatedAt)
            .find_with_related(order_item::Entity)
            .all(&*self.db)
            .await?;

        let mut orders: Vec<OrderDetails> = rows
            .into_iter()
            .map(|(order, mut items)| {
                items.sort_by_key(|item| item.position);
                OrderDetails {
                    order,
                    items,
                    history: Vec::new(),
                }
            })
            .collect();
        orders.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));
        Ok(orders)
    }
}
