use crate::{
    entities::{order, order_item, Order, OrderItem},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        notifications::{dispatch_best_effort, NotificationDispatcher, OrderNotification},
        stock,
    },
};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome reported by the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

/// Payload of a gateway webhook event, delivered at least once and possibly
/// out of order. Signature verification happens upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentNotification {
    pub order_number: String,
    pub outcome: PaymentOutcome,
    pub payment_reference: String,
}

/// Applies payment-gateway outcomes to orders, committing stock on the first
/// successful payment and never twice.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            db,
            event_sender,
            dispatcher,
        }
    }

    /// Reconciles a gateway outcome with the referenced order.
    ///
    /// Idempotent: an order already `paid` makes any further delivery a
    /// no-op, so gateway redeliveries are harmless. The pending→paid claim is
    /// an optimistic guarded update; the stock decrement rides in the same
    /// transaction and therefore happens exactly once per order.
    #[instrument(skip(self, notification), fields(order_number = %notification.order_number, outcome = ?notification.outcome))]
    pub async fn reconcile(
        &self,
        notification: PaymentNotification,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let current = Order::find()
            .filter(order::Column::OrderNumber.eq(notification.order_number.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", notification.order_number))
            })?;

        if current.payment_status == order::PaymentStatus::Paid {
            txn.commit().await?;
            warn!(
                order_id = %current.id,
                payment_reference = %notification.payment_reference,
                "Payment already settled, ignoring delivery"
            );
            return Ok(current);
        }

        match notification.outcome {
            PaymentOutcome::Succeeded => self.apply_success(txn, current, &notification).await,
            PaymentOutcome::Failed => self.apply_failure(txn, current, &notification).await,
        }
    }

    async fn apply_success(
        &self,
        txn: DatabaseTransaction,
        current: order::Model,
        notification: &PaymentNotification,
    ) -> Result<order::Model, ServiceError> {
        if current.payment_status == order::PaymentStatus::Failed {
            // failed → paid is not a legal transition; the order must be
            // repaid first.
            return Err(ServiceError::StateConflict(format!(
                "order {} payment previously failed; repay before confirming",
                current.order_number
            )));
        }
        if current.status != order::OrderStatus::Pending {
            // A cancelled (or otherwise advanced) order must not be revived
            // by a late success event.
            return Err(ServiceError::StateConflict(format!(
                "order {} is {}, cannot confirm payment",
                current.order_number, current.status
            )));
        }

        let now = Utc::now();
        let claimed = order::Entity::update_many()
            .set(order::ActiveModel {
                payment_status: Set(order::PaymentStatus::Paid),
                status: Set(order::OrderStatus::Processing),
                version: Set(current.version + 1),
                updated_at: Set(Some(now)),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::Status.eq(order::OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(order::PaymentStatus::Pending))
            .filter(order::Column::Version.eq(current.version))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            // A racing delivery or cancellation won; the gateway redelivers
            // and the duplicate check then short-circuits.
            return Err(ServiceError::ConcurrentModification(current.id));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(current.id))
            .all(&txn)
            .await?;
        stock::decrement_stock(&txn, &items).await?;

        txn.commit().await?;

        let settled = order::Model {
            status: order::OrderStatus::Processing,
            payment_status: order::PaymentStatus::Paid,
            version: current.version + 1,
            updated_at: Some(now),
            ..current
        };

        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                order_id: settled.id,
                payment_reference: notification.payment_reference.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: settled.id,
                old_status: order::OrderStatus::Pending.to_string(),
                new_status: order::OrderStatus::Processing.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::StockCommitted {
                order_id: settled.id,
            })
            .await;
        dispatch_best_effort(
            self.dispatcher.clone(),
            OrderNotification::status_update(&settled, items.len()),
        );

        info!(
            order_id = %settled.id,
            payment_reference = %notification.payment_reference,
            "Payment confirmed, stock committed"
        );
        Ok(settled)
    }

    async fn apply_failure(
        &self,
        txn: DatabaseTransaction,
        current: order::Model,
        notification: &PaymentNotification,
    ) -> Result<order::Model, ServiceError> {
        if current.payment_status == order::PaymentStatus::Failed {
            txn.commit().await?;
            info!(order_id = %current.id, "Payment already marked failed, ignoring delivery");
            return Ok(current);
        }

        let now = Utc::now();
        let marked = order::Entity::update_many()
            .set(order::ActiveModel {
                payment_status: Set(order::PaymentStatus::Failed),
                version: Set(current.version + 1),
                updated_at: Set(Some(now)),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::PaymentStatus.eq(order::PaymentStatus::Pending))
            .filter(order::Column::Version.eq(current.version))
            .exec(&txn)
            .await?;
        if marked.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(current.id));
        }

        txn.commit().await?;

        let failed = order::Model {
            payment_status: order::PaymentStatus::Failed,
            version: current.version + 1,
            updated_at: Some(now),
            ..current
        };

        self.event_sender
            .send_or_log(Event::PaymentFailed {
                order_id: failed.id,
                payment_reference: notification.payment_reference.clone(),
            })
            .await;

        info!(
            order_id = %failed.id,
            payment_reference = %notification.payment_reference,
            "Payment failure recorded, inventory untouched"
        );
        Ok(failed)
    }
}
