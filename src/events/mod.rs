use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Cloneable handle for publishing domain events to the in-process bus.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging (never propagating) a channel failure.
    ///
    /// Event publication happens after a committed transaction; a full or
    /// closed channel must not fail the business operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Domain events emitted after successful state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
    },
    CartItemUpdated {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },

    // Checkout / order events
    CheckoutCompleted {
        cart_id: Uuid,
        order_id: Uuid,
    },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),
    OrderRepaid(Uuid),

    // Payment events
    PaymentConfirmed {
        order_id: Uuid,
        payment_reference: String,
    },
    PaymentFailed {
        order_id: Uuid,
        payment_reference: String,
    },

    // Stock events
    StockCommitted {
        order_id: Uuid,
    },
    StockRestored {
        order_id: Uuid,
    },
}

/// Drains the event channel, logging each event.
///
/// Downstream consumers (projections, webhooks, analytics) subscribe by
/// replacing or wrapping this loop; the core only guarantees delivery into
/// the channel.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(?event, "Received event");
    }

    info!("Event processing loop stopped");
}
