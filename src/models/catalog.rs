//! Typed view of catalog rows.
//!
//! A product is either priced and stocked at product level, or entirely
//! through its variations. `CatalogProduct` makes the two shapes distinct so
//! a simple product can never carry variations and a variant product never
//! exposes a product-level price.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{product, product_variant};
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    pub id: Uuid,
    pub size: String,
    pub price: Decimal,
    pub stock: i32,
}

impl From<product_variant::Model> for Variation {
    fn from(model: product_variant::Model) -> Self {
        Self {
            id: model.id,
            size: model.size,
            price: model.price,
            stock: model.stock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductKind {
    Simple { price: Decimal, stock: i32 },
    Variant { variations: Vec<Variation> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub name: String,
    pub image: Option<String>,
    /// Percent, applied uniformly to the base price and every variation
    pub discount: Decimal,
    pub kind: ProductKind,
}

/// What a cart line resolves to on a given product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub variation_id: Option<Uuid>,
    pub selected_size: Option<String>,
    pub base_price: Decimal,
    pub stock: i32,
}

impl CatalogProduct {
    /// Builds the typed product from its row and variation rows (in display order).
    pub fn from_rows(
        product: product::Model,
        variations: Vec<product_variant::Model>,
    ) -> Result<Self, ServiceError> {
        let kind = if product.has_variations {
            let mut variations = variations;
            variations.sort_by_key(|v| v.position);
            ProductKind::Variant {
                variations: variations.into_iter().map(Variation::from).collect(),
            }
        } else {
            let price = product.price.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "product {} has neither variations nor a price",
                    product.id
                ))
            })?;
            ProductKind::Simple {
                price,
                stock: product.stock.unwrap_or(0),
            }
        };

        Ok(Self {
            id: product.id,
            name: product.name,
            image: product.image,
            discount: product.discount,
            kind,
        })
    }

    pub fn has_variations(&self) -> bool {
        matches!(self.kind, ProductKind::Variant { .. })
    }

    pub fn find_variation(&self, variation_id: Uuid) -> Option<&Variation> {
        match &self.kind {
            ProductKind::Variant { variations } => variations.iter().find(|v| v.id == variation_id),
            ProductKind::Simple { .. } => None,
        }
    }

    fn find_size(&self, size: &str) -> Option<&Variation> {
        match &self.kind {
            ProductKind::Variant { variations } => variations
                .iter()
                .find(|v| v.size.eq_ignore_ascii_case(size.trim())),
            ProductKind::Simple { .. } => None,
        }
    }

    /// Picks the priced, stocked unit a cart line refers to.
    ///
    /// Variant products need a variation id, or failing that a size that
    /// matches one of the variations. Simple products reject any variation.
    pub fn select(
        &self,
        variation_id: Option<Uuid>,
        selected_size: Option<&str>,
    ) -> Result<Selection, ServiceError> {
        match &self.kind {
            ProductKind::Simple { price, stock } => {
                if let Some(variation_id) = variation_id {
                    return Err(ServiceError::ValidationError(format!(
                        "product {} has no variations but variation {} was given",
                        self.id, variation_id
                    )));
                }
                Ok(Selection {
                    variation_id: None,
                    selected_size: None,
                    base_price: *price,
                    stock: *stock,
                })
            }
            ProductKind::Variant { .. } => {
                let variation = match (variation_id, selected_size) {
                    (Some(variation_id), _) => self
                        .find_variation(variation_id)
                        .ok_or_else(|| ServiceError::variation_not_found(self.id, variation_id))?,
                    (None, Some(size)) if !size.trim().is_empty() => {
                        self.find_size(size).ok_or_else(|| {
                            ServiceError::VariationRequired(format!(
                                "size '{}' is not available for {}; pick a size",
                                size, self.name
                            ))
                        })?
                    }
                    _ => {
                        return Err(ServiceError::VariationRequired(format!(
                            "{} comes in several sizes; pick one before checkout",
                            self.name
                        )))
                    }
                };
                Ok(Selection {
                    variation_id: Some(variation.id),
                    selected_size: Some(variation.size.clone()),
                    base_price: variation.price,
                    stock: variation.stock,
                })
            }
        }
    }

    pub fn unit_price(&self, base_price: Decimal) -> Decimal {
        discounted_price(base_price, self.discount)
    }
}

/// `base * (1 - discount/100)`, rounded half away from zero to cents.
/// Discounts outside 0..=100 are clamped.
pub fn discounted_price(base: Decimal, discount_percent: Decimal) -> Decimal {
    let discount = discount_percent.clamp(Decimal::ZERO, dec!(100));
    (base * (dec!(100) - discount) / dec!(100))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn product_row(has_variations: bool, price: Option<Decimal>, stock: Option<i32>) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Linen Shirt".into(),
            image: None,
            price,
            stock,
            has_variations,
            discount: dec!(10),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn variant_row(product_id: Uuid, size: &str, price: Decimal, stock: i32, position: i32) -> product_variant::Model {
        product_variant::Model {
            id: Uuid::new_v4(),
            product_id,
            size: size.into(),
            price,
            stock,
            position,
        }
    }

    #[test]
    fn variant_product_prices_selected_size_with_product_discount() {
        let row = product_row(true, None, None);
        let m = variant_row(row.id, "M", dec!(100), 0, 0);
        let l = variant_row(row.id, "L", dec!(100), 5, 1);
        let product = CatalogProduct::from_rows(row, vec![l.clone(), m]).unwrap();

        let selection = product.select(Some(l.id), None).unwrap();
        assert_eq!(selection.stock, 5);
        assert_eq!(selection.selected_size.as_deref(), Some("L"));
        assert_eq!(product.unit_price(selection.base_price), dec!(90));

        let by_size = product.select(None, Some("l")).unwrap();
        assert_eq!(by_size.variation_id, Some(l.id));
    }

    #[test]
    fn variant_product_requires_a_variation() {
        let row = product_row(true, None, None);
        let m = variant_row(row.id, "M", dec!(40), 2, 0);
        let product = CatalogProduct::from_rows(row, vec![m]).unwrap();

        assert!(matches!(
            product.select(None, None),
            Err(ServiceError::VariationRequired(_))
        ));
        assert!(matches!(
            product.select(None, Some("XXL")),
            Err(ServiceError::VariationRequired(_))
        ));
        assert!(matches!(
            product.select(Some(Uuid::new_v4()), None),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn simple_product_rejects_variation_and_ignores_variant_rows() {
        let row = product_row(false, Some(dec!(25)), Some(3));
        let stray = variant_row(row.id, "M", dec!(1), 99, 0);
        let product = CatalogProduct::from_rows(row, vec![stray.clone()]).unwrap();

        assert!(!product.has_variations());
        assert!(product.find_variation(stray.id).is_none());
        assert!(matches!(
            product.select(Some(stray.id), None),
            Err(ServiceError::ValidationError(_))
        ));
        let selection = product.select(None, None).unwrap();
        assert_eq!((selection.base_price, selection.stock), (dec!(25), 3));
    }

    #[test]
    fn simple_product_without_price_is_rejected() {
        let row = product_row(false, None, Some(3));
        assert!(CatalogProduct::from_rows(row, vec![]).is_err());
    }

    #[test]
    fn discount_rounds_to_cents_and_clamps() {
        assert_eq!(discounted_price(dec!(19.99), dec!(15)), dec!(16.99));
        assert_eq!(discounted_price(dec!(10), dec!(150)), dec!(0));
        assert_eq!(discounted_price(dec!(10), dec!(-5)), dec!(10));
    }

    proptest! {
        #[test]
        fn discounted_price_matches_formula(cents in 0i64..10_000_000, pct in 0u32..=100) {
            let base = Decimal::new(cents, 2);
            let discount = Decimal::from(pct);
            let price = discounted_price(base, discount);

            prop_assert!(price >= Decimal::ZERO);
            prop_assert!(price <= base);
            let exact = base * (Decimal::ONE - discount / dec!(100));
            prop_assert!((price - exact).abs() <= dec!(0.005));
        }
    }
}
