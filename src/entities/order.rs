use crate::models::order_status::OrderStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Public order id (`ORD-...`), unique
    #[sea_orm(unique)]
    pub order_number: String,
    pub user_id: Uuid,
    /// Payment intent id; `None` for cash on delivery. Unique when present.
    #[sea_orm(unique)]
    pub payment_id: Option<String>,
    pub payment_status: String,
    pub status: OrderStatus,
    pub delivery_address_id: Uuid,
    #[sea_orm(column_type = "Decimal(None)")]
    pub sub_total: Decimal,
    #[sea_orm(column_type = "Decimal(None)")]
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
