//! Cart Snapshot Resolver
//!
//! Cart lines store identity and quantity only; this turns them into priced
//! [`ResolvedLine`]s using the catalog as it is right now.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::{cart_item, product, product_variant};
use crate::errors::ServiceError;
use crate::models::{CatalogProduct, ResolvedLine};

#[derive(Clone)]
pub struct CartSnapshotResolver {
    db: Arc<DatabaseConnection>,
}

impl CartSnapshotResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves every line of the user's cart.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn resolve(&self, user_id: Uuid) -> Result<Vec<ResolvedLine>, ServiceError> {
        self.resolve_lines(user_id, &[]).await
    }

    /// Resolves the given cart lines of the user, or the whole cart when
    /// `line_ids` is empty.
    #[instrument(skip(self, line_ids), fields(user_id = %user_id, requested = line_ids.len()))]
    pub async fn resolve_lines(
        &self,
        user_id: Uuid,
        line_ids: &[Uuid],
    ) -> Result<Vec<ResolvedLine>, ServiceError> {
        let db = &*self.db;

        let mut query = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt);
        if !line_ids.is_empty() {
            query = query.filter(cart_item::Column::Id.is_in(line_ids.to_vec()));
        }
        let cart_lines = query.all(db).await?;

        if !line_ids.is_empty() {
            let found: HashSet<Uuid> = cart_lines.iter().map(|line| line.id).collect();
            if let Some(missing) = line_ids.iter().find(|id| !found.contains(id)) {
                return Err(ServiceError::NotFound(format!(
                    "cart line {} is not in your cart",
                    missing
                )));
            }
        }
        if cart_lines.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".into()));
        }

        let product_ids: Vec<Uuid> = cart_lines
            .iter()
            .map(|line| line.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut variations: HashMap<Uuid, Vec<product_variant::Model>> = HashMap::new();
        for variation in product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.is_in(product_ids))
            .all(db)
            .await?
        {
            variations
                .entry(variation.product_id)
                .or_default()
                .push(variation);
        }

        let mut catalog: HashMap<Uuid, CatalogProduct> = HashMap::new();
        let mut resolved = Vec::with_capacity(cart_lines.len());
        for line in cart_lines {
            if !catalog.contains_key(&line.product_id) {
                let row = products.get(&line.product_id).cloned().ok_or_else(|| {
                    warn!(cart_line_id = %line.id, product_id = %line.product_id, "cart line references a deleted product");
                    ServiceError::product_not_found(line.product_id)
                })?;
                let rows = variations.remove(&line.product_id).unwrap_or_default();
                catalog.insert(line.product_id, CatalogProduct::from_rows(row, rows)?);
            }
            let product = &catalog[&line.product_id];
            resolved.push(resolve_line(product, line)?);
        }

        debug!(lines = resolved.len(), "cart resolved");
        Ok(resolved)
    }
}

fn resolve_line(
    product: &CatalogProduct,
    line: cart_item::Model,
) -> Result<ResolvedLine, ServiceError> {
    if line.quantity < 1 {
        return Err(ServiceError::ValidationError(format!(
            "cart line {} has quantity {}",
            line.id, line.quantity
        )));
    }

    let selection = product.select(line.variation_id, line.selected_size.as_deref())?;
    Ok(ResolvedLine {
        cart_line_id: Some(line.id),
        product_id: product.id,
        name: product.name.clone(),
        image: product.image.clone(),
        variation_id: selection.variation_id,
        selected_size: selection.selected_size,
        quantity: line.quantity,
        unit_price: product.unit_price(selection.base_price),
        available_stock: selection.stock,
    })
}
