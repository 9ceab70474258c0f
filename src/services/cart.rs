use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{cart_item, product, product_variant};
use crate::errors::ServiceError;
use crate::models::CatalogProduct;

/// Input for adding a product to the cart
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    #[serde(rename = "productId")]
    pub product_id: Uuid,
    #[serde(rename = "variationId", default)]
    pub variation_id: Option<Uuid>,
    #[serde(rename = "selectedSize", default)]
    #[validate(length(min = 1, max = 32))]
    pub selected_size: Option<String>,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityInput {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub qty: i32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RemoveItemInput {
    #[serde(rename = "_id")]
    pub id: Uuid,
}

/// Maintains cart lines. Lines hold identity and quantity; prices are only
/// looked up at checkout.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Adds a line, merging into an existing line for the same product and
    /// variation. Variant products must name a variation by id or by size.
    #[instrument(skip(self, input), fields(user_id = %user_id, product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let row = product::Entity::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::product_not_found(input.product_id))?;
        let variations = product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(input.product_id))
            .all(&txn)
            .await?;
        let catalog = CatalogProduct::from_rows(row, variations)?;
        let selection = catalog.select(input.variation_id, input.selected_size.as_deref())?;

        let mut existing = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(input.product_id));
        existing = match selection.variation_id {
            Some(variation_id) => existing.filter(cart_item::Column::VariationId.eq(variation_id)),
            None => existing.filter(cart_item::Column::VariationId.is_null()),
        };

        let now = Utc::now();
        let line = match existing.one(&txn).await? {
            Some(line) => {
                let quantity = line.quantity + input.quantity;
                let mut line: cart_item::ActiveModel = line.into();
                line.quantity = Set(quantity);
                line.updated_at = Set(now);
                line.update(&txn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(input.product_id),
                    variation_id: Set(selection.variation_id),
                    selected_size: Set(selection.selected_size),
                    quantity: Set(input.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;
        info!(cart_line_id = %line.id, quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input), fields(user_id = %user_id, cart_line_id = %input.id))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        input: UpdateQuantityInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let line = self.find_line(user_id, input.id).await?;
        let mut line: cart_item::ActiveModel = line.into();
        line.quantity = Set(input.qty);
        line.updated_at = Set(Utc::now());
        Ok(line.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, line_id: Uuid) -> Result<(), ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.eq(line_id))
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(cart_line_not_found(line_id));
        }
        info!("cart line removed");
        Ok(())
    }

    async fn find_line(&self, user_id: Uuid, line_id: Uuid) -> Result<cart_item::Model, ServiceError> {
        cart_item::Entity::find_by_id(line_id)
            .filter(cart_item::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| cart_line_not_found(line_id))
    }
}

fn cart_line_not_found(line_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("cart line {} not found", line_id))
}
