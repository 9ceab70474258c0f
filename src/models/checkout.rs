use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

/// A cart line after price, discount and stock were looked up at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedLine {
    /// Originating cart line, cleared once the order is persisted
    pub cart_line_id: Option<Uuid>,
    pub product_id: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub variation_id: Option<Uuid>,
    pub selected_size: Option<String>,
    pub quantity: i32,
    /// Post-discount unit price
    pub unit_price: Decimal,
    /// Stock observed while resolving; informational only
    pub available_stock: i32,
}

impl ResolvedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

pub fn sub_total(lines: &[ResolvedLine]) -> Decimal {
    lines.iter().map(ResolvedLine::line_total).sum()
}

/// Lines and totals embedded into a payment session and replayed verbatim
/// when the payment is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutQuote {
    pub user_id: Uuid,
    pub delivery_address_id: Uuid,
    pub lines: Vec<ResolvedLine>,
    pub sub_total: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl CheckoutQuote {
    pub fn new(
        user_id: Uuid,
        delivery_address_id: Uuid,
        lines: Vec<ResolvedLine>,
        currency: impl Into<String>,
    ) -> Self {
        let sub_total = sub_total(&lines);
        Self {
            user_id,
            delivery_address_id,
            lines,
            sub_total,
            // shipping is always free
            total: sub_total,
            currency: currency.into(),
            created_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes and sanity-checks a quote coming back from the gateway.
    pub fn decode(raw: &str) -> Result<Self, ServiceError> {
        let quote: CheckoutQuote = serde_json::from_str(raw)
            .map_err(|e| ServiceError::ValidationError(format!("malformed checkout quote: {}", e)))?;

        if quote.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "checkout quote has no lines".into(),
            ));
        }
        if quote.lines.iter().any(|line| line.quantity < 1) {
            return Err(ServiceError::ValidationError(
                "checkout quote has a non-positive quantity".into(),
            ));
        }
        if sub_total(&quote.lines) != quote.sub_total {
            return Err(ServiceError::ValidationError(
                "checkout quote totals do not match its lines".into(),
            ));
        }
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(unit_price: Decimal, quantity: i32) -> ResolvedLine {
        ResolvedLine {
            cart_line_id: Some(Uuid::new_v4()),
            product_id: Uuid::new_v4(),
            name: "Tote".into(),
            image: None,
            variation_id: None,
            selected_size: None,
            quantity,
            unit_price,
            available_stock: 10,
        }
    }

    #[test]
    fn quote_totals_are_line_sums() {
        let quote = CheckoutQuote::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![line(dec!(90), 2), line(dec!(12.50), 1)],
            "usd",
        );
        assert_eq!(quote.sub_total, dec!(192.50));
        assert_eq!(quote.total, quote.sub_total);
    }

    #[test]
    fn decode_rejects_tampered_totals() {
        let mut quote = CheckoutQuote::new(Uuid::new_v4(), Uuid::new_v4(), vec![line(dec!(5), 1)], "usd");
        let decoded = CheckoutQuote::decode(&quote.encode().unwrap()).unwrap();
        assert_eq!(decoded, quote);

        quote.sub_total = dec!(1);
        assert!(matches!(
            CheckoutQuote::decode(&quote.encode().unwrap()),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(CheckoutQuote::decode("{not json").is_err());
    }
}
