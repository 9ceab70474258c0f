pub mod cart;
pub mod common;
pub mod health;
pub mod identity;
pub mod orders;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart::CartService,
    checkout::{CheckoutService, CheckoutSettings},
    order_factory::OrderFactory,
    order_query::OrderQueryService,
    order_status::OrderStatusService,
    payment_gateway::PaymentGateway,
    payment_webhook::{PaymentWebhookProcessor, WebhookVerifier},
};

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payment_webhook: Arc<PaymentWebhookProcessor>,
    pub order_status: Arc<OrderStatusService>,
    pub orders: Arc<OrderQueryService>,
}

impl AppServices {
    /// Wires every service over one pool, event channel and gateway.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let factory = OrderFactory::new(db_pool.clone(), event_sender.clone());

        let checkout = CheckoutService::new(
            db_pool.clone(),
            factory.clone(),
            gateway,
            CheckoutSettings {
                currency: config.currency.to_lowercase(),
                success_url: config.payment_success_url.clone(),
                cancel_url: config.payment_cancel_url.clone(),
                timeout: config.checkout_timeout(),
            },
        );

        let payment_webhook = PaymentWebhookProcessor::new(
            db_pool.clone(),
            WebhookVerifier::new(
                config.payment_webhook_secret.clone(),
                config.payment_webhook_tolerance_secs,
            ),
            factory,
            event_sender.clone(),
            config.checkout_timeout(),
        );

        Self {
            cart: Arc::new(CartService::new(db_pool.clone())),
            checkout: Arc::new(checkout),
            payment_webhook: Arc::new(payment_webhook),
            order_status: Arc::new(OrderStatusService::new(db_pool.clone(), event_sender)),
            orders: Arc::new(OrderQueryService::new(db_pool)),
        }
    }
}
