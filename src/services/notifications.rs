use crate::{entities::order, errors::ServiceError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Template kinds understood by the notification transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmation,
    StatusUpdate,
    Cancellation,
}

/// Structured order summary handed to the transport alongside the template
/// kind; rendering happens elsewhere.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_number: String,
    pub status: String,
    pub payment_status: String,
    pub total: Decimal,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderNotification {
    pub recipient: Uuid,
    pub kind: NotificationKind,
    pub summary: OrderSummary,
}

impl OrderNotification {
    fn new(kind: NotificationKind, order: &order::Model, item_count: usize) -> Self {
        Self {
            recipient: order.customer_id,
            kind,
            summary: OrderSummary {
                order_number: order.order_number.clone(),
                status: order.status.to_string(),
                payment_status: order.payment_status.to_string(),
                total: order.total,
                item_count,
            },
        }
    }

    pub fn order_confirmation(order: &order::Model, item_count: usize) -> Self {
        Self::new(NotificationKind::OrderConfirmation, order, item_count)
    }

    pub fn status_update(order: &order::Model, item_count: usize) -> Self {
        Self::new(NotificationKind::StatusUpdate, order, item_count)
    }

    pub fn cancellation(order: &order::Model, item_count: usize) -> Self {
        Self::new(NotificationKind::Cancellation, order, item_count)
    }
}

/// Transport seam for order notifications; delivery lives outside this core.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: OrderNotification) -> Result<(), ServiceError>;
}

/// Default dispatcher: records the notification in the structured log.
#[derive(Debug, Default, Clone)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn dispatch(&self, notification: OrderNotification) -> Result<(), ServiceError> {
        info!(
            recipient = %notification.recipient,
            kind = %notification.kind,
            order_number = %notification.summary.order_number,
            "Order notification dispatched"
        );
        Ok(())
    }
}

/// Fire-and-forget dispatch, invoked after a committed transaction.
///
/// Failures are logged, never propagated; delivery must not block or roll
/// back the business operation that triggered it.
pub fn dispatch_best_effort(
    dispatcher: Arc<dyn NotificationDispatcher>,
    notification: OrderNotification,
) {
    tokio::spawn(async move {
        let kind = notification.kind;
        let order_number = notification.summary.order_number.clone();
        if let Err(e) = dispatcher.dispatch(notification).await {
            warn!(
                %kind,
                %order_number,
                "Notification dispatch failed: {}",
                e
            );
        }
    });
}
