use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Lifecycle status of an order. Parsing is case-insensitive.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Intended end states. Not enforced: staff may move an order out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Parses an admin-supplied status, mapping unknown values to `InvalidStatus`.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        OrderStatus::from_str(raw.trim()).map_err(|_| {
            ServiceError::InvalidStatus(format!(
                "'{}' is not one of pending, processing, delivered, cancelled",
                raw
            ))
        })
    }
}
