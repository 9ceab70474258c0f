//! Payment Webhook Processor
//!
//! Verifies gateway-signed confirmation events and replays the frozen quote
//! they carry through the order factory, at most once per payment intent.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use strum::EnumString;
use tracing::{info, instrument, warn};

use crate::entities::address;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::CheckoutQuote;
use crate::services::order_factory::{NewOrder, OrderFactory, PaymentDetails};
use crate::services::order_query::{OrderDetails, OrderQueryService};
use crate::services::payment_gateway::QUOTE_METADATA_KEY;
use crate::services::with_timeout;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Checks `t=<unix>,v1=<hex>` signatures: HMAC-SHA256 over `"{t}.{body}"`.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            tolerance_secs,
        }
    }

    pub fn verify(&self, header: Option<&str>, body: &[u8]) -> Result<(), ServiceError> {
        self.verify_at(header, body, Utc::now().timestamp())
            .map_err(|reason| {
                metrics::increment_counter(metrics::WEBHOOK_SIGNATURE_FAILURES);
                warn!(%reason, "webhook signature rejected");
                ServiceError::InvalidSignature(reason.to_string())
            })
    }

    fn verify_at(&self, header: Option<&str>, body: &[u8], now: i64) -> Result<(), &'static str> {
        let secret = self.secret.as_deref().ok_or("no webhook secret configured")?;
        let header = header.ok_or("missing signature header")?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or("signature header has no timestamp")?;
        if candidates.is_empty() {
            return Err("signature header has no v1 signature");
        }

        let signed_at: i64 = timestamp.parse().map_err(|_| "malformed timestamp")?;
        if now.abs_diff(signed_at) > self.tolerance_secs {
            return Err("timestamp outside tolerance");
        }

        for candidate in candidates {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            let mut mac =
                HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "unusable secret")?;
            mac.update(timestamp.as_bytes());
            mac.update(b".");
            mac.update(body);
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err("no matching signature")
    }
}

/// Builds a valid signature header for `body`, as the gateway would.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, strum::Display)]
pub enum PaymentEventType {
    #[strum(serialize = "checkout.session.completed")]
    CheckoutSessionCompleted,
    #[strum(serialize = "payment_intent.succeeded")]
    PaymentIntentSucceeded,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: Value,
}

#[derive(Debug)]
pub enum WebhookOutcome {
    Processed(Box<OrderDetails>),
    AlreadyProcessed,
    Ignored,
}

/// A confirmed payment pulled out of the event envelope.
#[derive(Debug, PartialEq)]
struct ConfirmedPayment {
    event_id: Option<String>,
    payment_id: String,
    payment_status: String,
    quote: Option<String>,
}

fn confirmed_payment(
    event_type: PaymentEventType,
    event_id: Option<String>,
    object: &Value,
) -> Result<ConfirmedPayment, ServiceError> {
    let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

    let payment_id = match event_type {
        PaymentEventType::CheckoutSessionCompleted => text("payment_intent").or_else(|| text("id")),
        PaymentEventType::PaymentIntentSucceeded => text("id"),
    }
    .ok_or_else(|| ServiceError::ValidationError("event carries no payment id".into()))?;

    let payment_status = match event_type {
        PaymentEventType::CheckoutSessionCompleted => text("payment_status"),
        PaymentEventType::PaymentIntentSucceeded => text("status"),
    }
    .unwrap_or_else(|| "paid".to_string())
    .to_uppercase();

    let quote = object
        .get("metadata")
        .and_then(|m| m.get(QUOTE_METADATA_KEY))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ConfirmedPayment {
        event_id,
        payment_id,
        payment_status,
        quote,
    })
}

#[derive(Clone)]
pub struct PaymentWebhookProcessor {
    db: Arc<DatabaseConnection>,
    verifier: WebhookVerifier,
    orders: OrderQueryService,
    factory: OrderFactory,
    event_sender: Arc<EventSender>,
    timeout: Duration,
}

impl PaymentWebhookProcessor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        verifier: WebhookVerifier,
        factory: OrderFactory,
        event_sender: Arc<EventSender>,
        timeout: Duration,
    ) -> Self {
        Self {
            orders: OrderQueryService::new(db.clone()),
            db,
            verifier,
            factory,
            event_sender,
            timeout,
        }
    }

    /// Verifies and applies one delivery. `InvalidSignature` is returned
    /// before the body is even parsed.
    #[instrument(skip_all, fields(body_len = body.len()))]
    pub async fn handle(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, ServiceError> {
        self.verifier.verify(signature_header, body)?;

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| ServiceError::ValidationError(format!("malformed event: {}", e)))?;

        let Ok(event_type) = PaymentEventType::from_str(&envelope.event_type) else {
            info!(event_type = %envelope.event_type, "ignoring unhandled event type");
            return Ok(WebhookOutcome::Ignored);
        };

        let payment = confirmed_payment(event_type, envelope.id, &envelope.data.object)?;
        with_timeout(self.timeout, "payment webhook", self.apply(event_type, payment)).await
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.payment_id, event_id = ?payment.event_id))]
    async fn apply(
        &self,
        event_type: PaymentEventType,
        payment: ConfirmedPayment,
    ) -> Result<WebhookOutcome, ServiceError> {
        if self
            .orders
            .find_by_payment_id(&payment.payment_id)
            .await?
            .is_some()
        {
            return Ok(self.replay(payment));
        }
        self.place_paid_order(event_type, payment).await
    }

    /// Replays the frozen quote as a paid order. The unique index on the
    /// payment id settles concurrent deliveries that all passed the lookup.
    async fn place_paid_order(
        &self,
        event_type: PaymentEventType,
        payment: ConfirmedPayment,
    ) -> Result<WebhookOutcome, ServiceError> {
        let raw_quote = payment.quote.as_deref().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "{} event has no {} metadata",
                event_type, QUOTE_METADATA_KEY
            ))
        })?;
        let quote = CheckoutQuote::decode(raw_quote)?;

        let address_exists = address::Entity::find_by_id(quote.delivery_address_id)
            .filter(address::Column::UserId.eq(quote.user_id))
            .one(&*self.db)
            .await?
            .is_some();
        if !address_exists {
            return Err(ServiceError::NotFound(format!(
                "delivery address {} not found",
                quote.delivery_address_id
            )));
        }

        let new_order = NewOrder {
            user_id: quote.user_id,
            delivery_address_id: quote.delivery_address_id,
            lines: quote.lines,
            payment: PaymentDetails::paid(payment.payment_id.clone(), payment.payment_status.clone()),
        };

        match self.factory.create_order(new_order).await {
            Ok(details) => {
                info!(order_number = %details.order.order_number, "paid order created");
                Ok(WebhookOutcome::Processed(Box::new(details)))
            }
            // A concurrent delivery won the race on the payment id index.
            Err(ServiceError::DuplicateOrder(_)) => Ok(self.replay(payment)),
            Err(err) => Err(err),
        }
    }

    fn replay(&self, payment: ConfirmedPayment) -> WebhookOutcome {
        metrics::increment_counter(metrics::WEBHOOK_REPLAYS);
        info!("payment already has an order; ignoring replay");
        self.event_sender.send_or_log(Event::PaymentReplayIgnored {
            payment_id: payment.payment_id,
            event_id: payment.event_id,
        });
        WebhookOutcome::AlreadyProcessed
    }
}
