//! Payment gateway client.
//!
//! The gateway is injected into the checkout service as
//! `Arc<dyn PaymentGateway>`; `main` builds a [`StripeGateway`] from
//! configuration, tests substitute their own implementation.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::CheckoutQuote;

/// Metadata key carrying the frozen quote on sessions and payment intents
pub const QUOTE_METADATA_KEY: &str = "checkout_quote";

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub quote: CheckoutQuote,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout session for the quote. The quote must come
    /// back unchanged in the confirmation webhook's metadata.
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;
}

/// Stand-in used when no API key is configured.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_checkout_session(
        &self,
        _request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        Err(ServiceError::ServiceUnavailable(
            "online payment is not configured".into(),
        ))
    }
}

#[derive(Clone)]
pub struct StripeGateway {
    secret_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(
        secret_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            secret_key: secret_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(user_id = %request.quote.user_id, total = %request.quote.total))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let params = session_form(&request)?;

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, body = %error_text, "gateway rejected checkout session");
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}",
                status
            )));
        }

        let session: StripeSessionResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("unreadable gateway response: {}", e))
        })?;
        let url = session.url.ok_or_else(|| {
            ServiceError::ExternalServiceError("gateway session has no url".into())
        })?;

        info!(session_id = %session.id, "checkout session created");
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}

/// Minor currency units (cents).
fn minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))
}

fn session_form(request: &CheckoutSessionRequest) -> Result<Vec<(String, String)>, ServiceError> {
    let quote = &request.quote;
    let encoded_quote = quote.encode()?;

    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("client_reference_id".to_string(), quote.user_id.to_string()),
        (
            format!("metadata[{}]", QUOTE_METADATA_KEY),
            encoded_quote.clone(),
        ),
        (
            format!("payment_intent_data[metadata][{}]", QUOTE_METADATA_KEY),
            encoded_quote,
        ),
    ];

    for (i, line) in quote.lines.iter().enumerate() {
        let name = match &line.selected_size {
            Some(size) => format!("{} ({})", line.name, size),
            None => line.name.clone(),
        };
        let prefix = format!("line_items[{}]", i);
        params.push((
            format!("{}[price_data][currency]", prefix),
            quote.currency.clone(),
        ));
        params.push((format!("{}[price_data][product_data][name]", prefix), name));
        if let Some(image) = &line.image {
            params.push((
                format!("{}[price_data][product_data][images][0]", prefix),
                image.clone(),
            ));
        }
        params.push((
            format!("{}[price_data][unit_amount]", prefix),
            minor_units(line.unit_price)?.to_string(),
        ));
        params.push((format!("{}[quantity]", prefix), line.quantity.to_string()));
    }

    Ok(params)
}
