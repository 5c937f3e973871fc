use crate::{
    entities::{cart, cart_item, Cart, CartItem, Product, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Input for adding a line to a cart.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// Manages each customer's single active cart and its lines.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Returns the customer's active cart, creating one lazily if absent.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_or_create_cart(&self, customer_id: Uuid) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = self.find_active_cart(customer_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            status: Set(cart::CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::CartCreated(created.id))
            .await;

        info!(cart_id = %created.id, "Created cart");
        Ok(created)
    }

    /// Finds the customer's active cart, if any.
    pub async fn find_active_cart(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        let found = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// Adds a line to the cart, merging with an existing line for the same
    /// product/variant by summing quantities.
    #[instrument(skip(self, input), fields(cart_id = %cart_id, product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddItemInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let target = self.active_cart_for_update(&txn, cart_id).await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;
        if !product.is_available {
            return Err(ServiceError::ValidationError(format!(
                "{} ({}) is currently unavailable",
                product.name, product.sku
            )));
        }

        if let Some(variant_id) = input.variant_id {
            let variant = ProductVariant::find_by_id(variant_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Variant {} not found", variant_id))
                })?;
            if variant.product_id != product.id {
                return Err(ServiceError::ValidationError(format!(
                    "variant {} does not belong to product {}",
                    variant.sku, product.sku
                )));
            }
        }

        let mut line_query = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(input.product_id));
        line_query = match input.variant_id {
            Some(variant_id) => line_query.filter(cart_item::Column::VariantId.eq(variant_id)),
            None => line_query.filter(cart_item::Column::VariantId.is_null()),
        };
        let existing_line = line_query.one(&txn).await?;

        let now = Utc::now();
        let saved = if let Some(line) = existing_line {
            let merged_quantity = line.quantity + input.quantity;
            let mut line: cart_item::ActiveModel = line.into();
            line.quantity = Set(merged_quantity);
            line.updated_at = Set(now);
            line.update(&txn).await?
        } else {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                product_id: Set(input.product_id),
                variant_id: Set(input.variant_id),
                quantity: Set(input.quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?
        };

        let mut touched: cart::ActiveModel = target.into();
        touched.updated_at = Set(now);
        touched.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id: input.product_id,
            })
            .await;

        Ok(saved)
    }

    /// Sets a line's quantity; zero or negative removes the line.
    #[instrument(skip(self), fields(cart_id = %cart_id, item_id = %item_id))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return self.remove_item(cart_id, item_id).await;
        }

        let txn = self.db.begin().await?;
        self.active_cart_for_update(&txn, cart_id).await?;

        let line = self.cart_line(&txn, cart_id, item_id).await?;

        let mut line: cart_item::ActiveModel = line.into();
        line.quantity = Set(quantity);
        line.updated_at = Set(Utc::now());
        line.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated { cart_id, item_id })
            .await;
        Ok(())
    }

    /// Removes a line from the cart.
    #[instrument(skip(self), fields(cart_id = %cart_id, item_id = %item_id))]
    pub async fn remove_item(&self, cart_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        self.active_cart_for_update(&txn, cart_id).await?;

        let line = self.cart_line(&txn, cart_id, item_id).await?;
        CartItem::delete_by_id(line.id).exec(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved { cart_id, item_id })
            .await;
        Ok(())
    }

    /// Returns a cart with its lines in insertion order.
    pub async fn get_cart_with_items(
        &self,
        cart_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let found = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok((found, items))
    }

    async fn active_cart_for_update(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        cart_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        let target = Cart::find_by_id(cart_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if target.status != cart::CartStatus::Active {
            return Err(ServiceError::StateConflict(format!(
                "cart {} is {}",
                cart_id, target.status
            )));
        }
        Ok(target)
    }

    async fn cart_line(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        let line = CartItem::find_by_id(item_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if line.cart_id != cart_id {
            return Err(ServiceError::InvalidOperation(format!(
                "cart item {} does not belong to cart {}",
                item_id, cart_id
            )));
        }
        Ok(line)
    }
}
