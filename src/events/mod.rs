use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::OrderStatus;

/// Domain events published by the order pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
        total: Decimal,
        payment_id: Option<String>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    CartCleared {
        user_id: Uuid,
        lines: u64,
    },
    PaymentReplayIgnored {
        payment_id: String,
        event_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without waiting; a full or closed channel only logs.
    /// Business operations have already committed when this is called.
    pub fn send_or_log(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            warn!(error = %err, "dropping domain event");
        }
    }
}

/// Consumes domain events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPlaced {
                order_id,
                order_number,
                user_id,
                total,
                payment_id,
            } => info!(
                %order_id,
                %order_number,
                %user_id,
                %total,
                payment_id = payment_id.as_deref().unwrap_or("cod"),
                "order placed"
            ),
            Event::OrderStatusChanged {
                order_id,
                order_number,
                old_status,
                new_status,
            } => info!(
                %order_id,
                %order_number,
                %old_status,
                %new_status,
                "order status changed"
            ),
            Event::CartCleared { user_id, lines } => {
                info!(%user_id, lines, "cart cleared after checkout")
            }
            Event::PaymentReplayIgnored {
                payment_id,
                event_id,
            } => info!(
                %payment_id,
                event_id = event_id.as_deref().unwrap_or("-"),
                "duplicate payment confirmation ignored"
            ),
        }
    }

    info!("Event processing loop stopped");
}
