//! Inventory Ledger
//!
//! Owns the per-product and per-variation stock counters. The only write
//! paths are [`InventoryLedger::decrement`], a single conditional
//! `UPDATE ... SET stock = stock - n WHERE stock >= n`, and its inverse
//! [`InventoryLedger::release`]. There is no "set stock" or separate
//! check-then-write primitive.
//!
//! Every operation takes the connection to run on so callers can include it
//! in their own transaction.

use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entities::{product, product_variant};
use crate::errors::{ServiceError, StockShortfall};
use crate::metrics;

/// The counter a stock operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockTarget {
    /// Product-level stock of a product without variations
    Product { product_id: Uuid },
    /// Stock of one variation of a product with variations
    Variant { product_id: Uuid, variation_id: Uuid },
}

impl StockTarget {
    pub fn for_line(product_id: Uuid, variation_id: Option<Uuid>) -> Self {
        match variation_id {
            Some(variation_id) => Self::Variant {
                product_id,
                variation_id,
            },
            None => Self::Product { product_id },
        }
    }

    pub fn product_id(&self) -> Uuid {
        match self {
            Self::Product { product_id } | Self::Variant { product_id, .. } => *product_id,
        }
    }

    pub fn variation_id(&self) -> Option<Uuid> {
        match self {
            Self::Product { .. } => None,
            Self::Variant { variation_id, .. } => Some(*variation_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Insufficient { available: i32 },
}

/// Snapshot of a counter with the names needed to report on it.
#[derive(Debug, Clone)]
struct StockLevel {
    product_name: String,
    selected_size: Option<String>,
    stock: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryLedger;

impl InventoryLedger {
    pub fn new() -> Self {
        Self
    }

    /// Reports whether `quantity` units are currently on hand. Advisory only:
    /// the answer can be stale by the time a decrement runs.
    #[instrument(skip(self, conn))]
    pub async fn check_availability<C: ConnectionTrait>(
        &self,
        conn: &C,
        target: StockTarget,
        quantity: i32,
    ) -> Result<Availability, ServiceError> {
        let level = self.stock_level(conn, target).await?;
        if level.stock >= quantity {
            Ok(Availability::Available)
        } else {
            Ok(Availability::Insufficient {
                available: level.stock.max(0),
            })
        }
    }

    /// Atomically removes `quantity` units iff at least that many are on hand.
    #[instrument(skip(self, conn))]
    pub async fn decrement<C: ConnectionTrait>(
        &self,
        conn: &C,
        target: StockTarget,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be at least 1, got {}",
                quantity
            )));
        }

        let result = match target {
            StockTarget::Product { product_id } => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).sub(quantity),
                    )
                    .filter(product::Column::Id.eq(product_id))
                    .filter(product::Column::HasVariations.eq(false))
                    .filter(product::Column::Stock.gte(quantity))
                    .exec(conn)
                    .await?
            }
            StockTarget::Variant {
                product_id,
                variation_id,
            } => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::Stock,
                        Expr::col(product_variant::Column::Stock).sub(quantity),
                    )
                    .filter(product_variant::Column::Id.eq(variation_id))
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .filter(product_variant::Column::Stock.gte(quantity))
                    .exec(conn)
                    .await?
            }
        };

        if result.rows_affected == 1 {
            debug!("stock decremented");
            return Ok(());
        }

        // The update matched nothing: either the row is gone or stock is short.
        // This read only explains the failure, it never authorizes a write.
        let level = self.stock_level(conn, target).await?;
        metrics::increment_counter(metrics::CHECKOUT_INSUFFICIENT_STOCK);
        let shortfall = StockShortfall {
            product_id: target.product_id(),
            product_name: level.product_name,
            variation_id: target.variation_id(),
            selected_size: level.selected_size,
            requested: quantity,
            available: level.stock.max(0),
        };
        warn!(%shortfall, "insufficient stock");
        Err(ServiceError::InsufficientStock(shortfall))
    }

    /// Returns `quantity` units to a counter. Used to compensate decrements of
    /// an order that could not be completed.
    #[instrument(skip(self, conn))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        target: StockTarget,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be at least 1, got {}",
                quantity
            )));
        }

        let result = match target {
            StockTarget::Product { product_id } => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).add(quantity),
                    )
                    .filter(product::Column::Id.eq(product_id))
                    .filter(product::Column::HasVariations.eq(false))
                    .exec(conn)
                    .await?
            }
            StockTarget::Variant {
                product_id,
                variation_id,
            } => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::Stock,
                        Expr::col(product_variant::Column::Stock).add(quantity),
                    )
                    .filter(product_variant::Column::Id.eq(variation_id))
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .exec(conn)
                    .await?
            }
        };

        if result.rows_affected == 0 {
            warn!("release target no longer exists");
            return Err(Self::missing(target));
        }
        info!("stock released");
        Ok(())
    }

    async fn stock_level<C: ConnectionTrait>(
        &self,
        conn: &C,
        target: StockTarget,
    ) -> Result<StockLevel, ServiceError> {
        let product = product::Entity::find_by_id(target.product_id())
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::product_not_found(target.product_id()))?;

        match target {
            StockTarget::Product { product_id } => {
                if product.has_variations {
                    return Err(ServiceError::VariationRequired(format!(
                        "{} ({}) is stocked per size",
                        product.name, product_id
                    )));
                }
                Ok(StockLevel {
                    product_name: product.name,
                    selected_size: None,
                    stock: product.stock.unwrap_or(0),
                })
            }
            StockTarget::Variant {
                product_id,
                variation_id,
            } => {
                let variation = product_variant::Entity::find_by_id(variation_id)
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .one(conn)
                    .await?
                    .ok_or_else(|| ServiceError::variation_not_found(product_id, variation_id))?;
                Ok(StockLevel {
                    product_name: product.name,
                    selected_size: Some(variation.size),
                    stock: variation.stock,
                })
            }
        }
    }

    fn missing(target: StockTarget) -> ServiceError {
        match target {
            StockTarget::Product { product_id } => ServiceError::product_not_found(product_id),
            StockTarget::Variant {
                product_id,
                variation_id,
            } => ServiceError::variation_not_found(product_id, variation_id),
        }
    }
}
