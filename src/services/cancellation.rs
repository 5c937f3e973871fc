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
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Cancels orders (restoring committed inventory) and re-opens them for
/// another payment attempt.
#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl CancellationService {
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

    /// Cancels a pending or processing order.
    ///
    /// Stock is restored only when the payment completed: the decrement
    /// happens exactly at the pending→paid transition, so restoration must
    /// mirror it exactly. Cancelling a never-paid order restores nothing.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let current = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !current.status.can_cancel() {
            return Err(ServiceError::StateConflict(format!(
                "cannot cancel order {} in status {}",
                current.order_number, current.status
            )));
        }

        let mut item_count = 0usize;
        let stock_restored = current.payment_status == order::PaymentStatus::Paid;
        if stock_restored {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.eq(current.id))
                .all(&txn)
                .await?;
            item_count = items.len();
            stock::restore_stock(&txn, &items).await?;
        }

        let now = Utc::now();
        let notes = merge_reason(current.notes.as_deref(), reason.as_deref());
        let cancelled_rows = order::Entity::update_many()
            .set(order::ActiveModel {
                status: Set(order::OrderStatus::Cancelled),
                notes: Set(notes.clone()),
                version: Set(current.version + 1),
                updated_at: Set(Some(now)),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::Version.eq(current.version))
            .exec(&txn)
            .await?;
        if cancelled_rows.rows_affected == 0 {
            // Lost the race against a payment confirmation or another
            // cancellation; the caller may retry against the fresh state.
            return Err(ServiceError::ConcurrentModification(current.id));
        }

        txn.commit().await?;

        let cancelled = order::Model {
            status: order::OrderStatus::Cancelled,
            notes,
            version: current.version + 1,
            updated_at: Some(now),
            ..current
        };

        self.event_sender
            .send_or_log(Event::OrderCancelled(cancelled.id))
            .await;
        if stock_restored {
            self.event_sender
                .send_or_log(Event::StockRestored {
                    order_id: cancelled.id,
                })
                .await;
        }
        dispatch_best_effort(
            self.dispatcher.clone(),
            OrderNotification::cancellation(&cancelled, item_count),
        );

        info!(
            order_id = %cancelled.id,
            order_number = %cancelled.order_number,
            stock_restored,
            "Order cancelled"
        );
        Ok(cancelled)
    }

    /// Re-opens a cancelled or failed-payment order for another payment
    /// attempt: status and payment status both return to pending. Stock is
    /// untouched; it will be committed again when the new payment settles.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn repay_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let current = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let repayable = current.status == order::OrderStatus::Cancelled
            || current.payment_status == order::PaymentStatus::Failed;
        if !repayable {
            return Err(ServiceError::StateConflict(format!(
                "order {} in status {} with payment {} cannot be repaid",
                current.order_number, current.status, current.payment_status
            )));
        }

        let now = Utc::now();
        let reopened_rows = order::Entity::update_many()
            .set(order::ActiveModel {
                status: Set(order::OrderStatus::Pending),
                payment_status: Set(order::PaymentStatus::Pending),
                version: Set(current.version + 1),
                updated_at: Set(Some(now)),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::Version.eq(current.version))
            .exec(&txn)
            .await?;
        if reopened_rows.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(current.id));
        }

        txn.commit().await?;

        let reopened = order::Model {
            status: order::OrderStatus::Pending,
            payment_status: order::PaymentStatus::Pending,
            version: current.version + 1,
            updated_at: Some(now),
            ..current
        };

        self.event_sender
            .send_or_log(Event::OrderRepaid(reopened.id))
            .await;

        info!(
            order_id = %reopened.id,
            order_number = %reopened.order_number,
            "Order reopened for payment"
        );
        Ok(reopened)
    }
}

fn merge_reason(existing: Option<&str>, reason: Option<&str>) -> Option<String> {
    match (existing, reason) {
        (Some(notes), Some(reason)) => Some(format!("{}\nCancelled: {}", notes, reason)),
        (None, Some(reason)) => Some(format!("Cancelled: {}", reason)),
        (notes, None) => notes.map(str::to_string),
    }
}
