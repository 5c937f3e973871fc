use crate::{
    config::AppConfig,
    entities::{cart, cart_item, order, order_item, Cart, CartItem},
    errors::{self, ServiceError},
    events::{Event, EventSender},
    services::{
        notifications::{dispatch_best_effort, NotificationDispatcher, OrderNotification},
        order_numbers, stock,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Order-number collisions are rare; exhausting this many whole-transaction
/// retries means something other than a sequence race is wrong.
const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// Address snapshot stored on the order at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, message = "Recipient name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Address line is required"))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    pub region: Option<String>,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2, message = "Country must be a 2-letter code"))]
    pub country: String,
    pub phone: Option<String>,
}

/// Checkout input. Tax, shipping cost and discount arrive already computed;
/// this core owns no pricing rules.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub customer_id: Uuid,
    #[validate]
    pub shipping_address: Address,
    /// Defaults to the shipping address when absent.
    #[validate]
    pub billing_address: Option<Address>,
    pub notes: Option<String>,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
}

/// Converts a customer's active cart into a durable order.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            dispatcher,
            config,
        }
    }

    /// Materialises an order from the customer's active cart.
    ///
    /// Within one transaction: re-validates stock, computes totals from the
    /// priced line snapshots, writes the order and its snapshot items, flips
    /// the cart to converted and deletes its items. All five writes succeed
    /// or none do; the cart is left untouched by any failure.
    ///
    /// Stock is NOT decremented here. Inventory commits only at payment
    /// confirmation, so an abandoned or unpaid checkout never locks stock.
    ///
    /// An order-number collision retries the whole transaction with a bumped
    /// sequence offset. The transaction runs under a bounded time budget so a
    /// stalled lock cannot wedge the checkout path.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn complete_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<order::Model, ServiceError> {
        request.validate()?;

        let budget = Duration::from_secs(self.config.db_statement_timeout_secs);
        let mut attempt: u32 = 0;

        loop {
            let outcome = timeout(budget, self.try_checkout(&request, u64::from(attempt)))
                .await
                .map_err(|_| {
                    ServiceError::Timeout("checkout transaction exceeded its time budget".into())
                })?;

            match outcome {
                Ok((committed, cart_id, item_count)) => {
                    self.event_sender
                        .send_or_log(Event::CheckoutCompleted {
                            cart_id,
                            order_id: committed.id,
                        })
                        .await;
                    self.event_sender
                        .send_or_log(Event::OrderCreated(committed.id))
                        .await;
                    dispatch_best_effort(
                        self.dispatcher.clone(),
                        OrderNotification::order_confirmation(&committed, item_count),
                    );

                    info!(
                        order_id = %committed.id,
                        order_number = %committed.order_number,
                        total = %committed.total,
                        "Checkout completed"
                    );
                    return Ok(committed);
                }
                Err(ServiceError::DatabaseError(err))
                    if errors::is_unique_violation(&err)
                        && attempt + 1 < MAX_ORDER_NUMBER_ATTEMPTS =>
                {
                    attempt += 1;
                    warn!(attempt, "Order number collision, retrying checkout");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_checkout(
        &self,
        request: &CheckoutRequest,
        number_offset: u64,
    ) -> Result<(order::Model, Uuid, usize), ServiceError> {
        let txn = self.db.begin().await?;

        let active_cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(request.customer_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No active cart for customer {}",
                    request.customer_id
                ))
            })?;

        let lines = stock::resolve_cart_lines(&txn, active_cart.id).await?;
        stock::validate_cart_lines(&lines)?;

        let subtotal: Decimal = lines.iter().map(|line| line.line_total()).sum();
        let total = subtotal + request.tax + request.shipping_cost - request.discount;
        if total < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "discount {} exceeds the order value",
                request.discount
            )));
        }

        let order_number = order_numbers::next_candidate(&txn, number_offset).await?;
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let billing = request
            .billing_address
            .clone()
            .unwrap_or_else(|| request.shipping_address.clone());

        let committed = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(request.customer_id),
            status: Set(order::OrderStatus::Pending),
            payment_status: Set(order::PaymentStatus::Pending),
            subtotal: Set(subtotal),
            tax: Set(request.tax),
            shipping_cost: Set(request.shipping_cost),
            discount: Set(request.discount),
            total: Set(total),
            shipping_address: Set(snapshot_address(&request.shipping_address)?),
            billing_address: Set(snapshot_address(&billing)?),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        for line in &lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                variant_id: Set(line.item.variant_id),
                name: Set(line.display_name().to_string()),
                sku: Set(line.sku().to_string()),
                unit_price: Set(line.unit_price()),
                quantity: Set(line.item.quantity),
                line_total: Set(line.line_total()),
                thumbnail: Set(line.product.thumbnail.clone()),
                variant_name: Set(line.variant.as_ref().map(|v| v.name.clone())),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        let converted = cart::Entity::update_many()
            .set(cart::ActiveModel {
                status: Set(cart::CartStatus::Converted),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(active_cart.id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .exec(&txn)
            .await?;
        if converted.rows_affected == 0 {
            return Err(ServiceError::StateConflict(format!(
                "cart {} is no longer active",
                active_cart.id
            )));
        }

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(active_cart.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok((committed, active_cart.id, lines.len()))
    }
}

fn snapshot_address(address: &Address) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(address)
        .map_err(|e| ServiceError::InternalError(format!("address snapshot: {}", e)))
}
