#![allow(dead_code)]

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, Schema, Set,
};
use serde_json::json;
use std::sync::Arc;
use storefront_core::{
    config::AppConfig,
    entities::{self, cart, cart_item, order, order_item, product, product_variant},
    events::{self, EventSender},
    services::{
        checkout::{Address, CheckoutRequest},
        notifications::LoggingDispatcher,
    },
    CoreServices,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Rewrites any `Decimal(Some((p, s)))` column with precision `p > 16` down to
/// precision 16 for the SQLite test schema only.
///
/// The entities declare `Decimal(Some((19, 4)))` (the production Postgres
/// precision), but sea-query's SQLite table builder hard-panics on any decimal
/// precision greater than 16. SQLite ignores declared numeric precision, so
/// capping it here is invisible to the tests while leaving the entity
/// definitions — and the production Postgres schema — untouched. All other
/// column types, specs, indexes (including the primary key), and foreign keys
/// are preserved verbatim.
fn sqlite_portable(stmt: &sea_orm::sea_query::TableCreateStatement) -> sea_orm::sea_query::TableCreateStatement {
    use sea_orm::sea_query::{Alias, ColumnDef, ColumnSpec, ColumnType, TableCreateStatement};

    let mut rebuilt = TableCreateStatement::new();
    if let Some(table) = stmt.get_table_name() {
        rebuilt.table(table.clone());
    }

    for col in stmt.get_columns() {
        let capped = match col.get_column_type() {
            Some(ColumnType::Decimal(Some((p, s)))) if *p > 16 => {
                Some(ColumnType::Decimal(Some((16, *s))))
            }
            _ => None,
        };

        let Some(new_type) = capped else {
            // Not an over-precision decimal: re-add the column verbatim.
            rebuilt.col(col.clone());
            continue;
        };

        let mut new_col = ColumnDef::new_with_type(Alias::new(col.get_column_name()), new_type);
        for spec in col.get_column_spec() {
            match spec {
                ColumnSpec::Null => { new_col.null(); }
                ColumnSpec::NotNull => { new_col.not_null(); }
                ColumnSpec::Default(expr) => { new_col.default(expr.clone()); }
                ColumnSpec::AutoIncrement => { new_col.auto_increment(); }
                ColumnSpec::UniqueKey => { new_col.unique_key(); }
                ColumnSpec::PrimaryKey => { new_col.primary_key(); }
                ColumnSpec::Check(expr) => { new_col.check(expr.clone()); }
                ColumnSpec::Generated { expr, stored } => { new_col.generated(expr.clone(), *stored); }
                ColumnSpec::Comment(c) => { new_col.comment(c.clone()); }
                ColumnSpec::Extra(e) => { new_col.extra(e.clone()); }
                ColumnSpec::Using(_) => {}
            }
        }
        rebuilt.col(&mut new_col);
    }

    for index in stmt.get_indexes() {
        rebuilt.index(&mut index.clone());
    }
    for fk in stmt.get_foreign_key_create_stmts() {
        rebuilt.foreign_key(&mut fk.clone());
    }
    if let Some(comment) = stmt.get_comment() {
        rebuilt.comment(comment.clone());
    }

    rebuilt
}

/// Test harness backed by an in-memory SQLite database.
///
/// The pool is pinned to a single connection so every query sees the same
/// in-memory database; the schema is derived from the entities.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: CoreServices,
    pub event_sender: EventSender,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).min_connections(1);

        let db = Database::connect(options)
            .await
            .expect("failed to open test database");

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        let statements = [
            schema.create_table_from_entity(entities::Product),
            schema.create_table_from_entity(entities::ProductVariant),
            schema.create_table_from_entity(entities::Cart),
            schema.create_table_from_entity(entities::CartItem),
            schema.create_table_from_entity(entities::Order),
            schema.create_table_from_entity(entities::OrderItem),
        ];
        for statement in &statements {
            let statement = sqlite_portable(statement);
            db.execute(backend.build(&statement))
                .await
                .expect("failed to create table");
        }

        let db = Arc::new(db);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let config = Arc::new(AppConfig::new("sqlite::memory:"));
        let services = CoreServices::new(
            db.clone(),
            config,
            event_sender.clone(),
            Arc::new(LoggingDispatcher),
        );

        Self {
            db,
            services,
            event_sender,
            _event_task: event_task,
        }
    }

    /// Seeds an available product with the given price and stock.
    pub async fn seed_product(
        &self,
        name: &str,
        sku: &str,
        price: Decimal,
        stock: i32,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            price: Set(price),
            stock_quantity: Set(stock),
            is_available: Set(true),
            thumbnail: Set(Some(format!("https://cdn.test/{}.jpg", sku))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed product")
    }

    /// Seeds a variant belonging to `product_id`.
    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        name: &str,
        sku: &str,
        price: Decimal,
        stock: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            price: Set(price),
            stock_quantity: Set(stock),
            attributes: Set(json!({"color": "navy"})),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed variant")
    }

    pub async fn mark_unavailable(&self, product_id: Uuid) {
        let found = entities::Product::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("failed to load product")
            .expect("product missing");
        let mut active: product::ActiveModel = found.into();
        active.is_available = Set(false);
        active.update(&*self.db).await.expect("failed to update product");
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        entities::Product::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("failed to load product")
            .expect("product missing")
            .stock_quantity
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        entities::ProductVariant::find_by_id(variant_id)
            .one(&*self.db)
            .await
            .expect("failed to load variant")
            .expect("variant missing")
            .stock_quantity
    }

    pub async fn order_count(&self) -> u64 {
        entities::Order::find()
            .count(&*self.db)
            .await
            .expect("failed to count orders")
    }

    pub async fn order_by_id(&self, order_id: Uuid) -> order::Model {
        entities::Order::find_by_id(order_id)
            .one(&*self.db)
            .await
            .expect("failed to load order")
            .expect("order missing")
    }

    pub async fn order_items(&self, order_id: Uuid) -> Vec<order_item::Model> {
        entities::OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .expect("failed to load order items")
    }

    pub async fn cart_by_id(&self, cart_id: Uuid) -> cart::Model {
        entities::Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await
            .expect("failed to load cart")
            .expect("cart missing")
    }

    pub async fn cart_item_count(&self, cart_id: Uuid) -> u64 {
        entities::CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .count(&*self.db)
            .await
            .expect("failed to count cart items")
    }

    /// Forces an order into the given status, bypassing the services.
    pub async fn force_order_status(&self, order_id: Uuid, status: order::OrderStatus) {
        let found = self.order_by_id(order_id).await;
        let mut active: order::ActiveModel = found.into();
        active.status = Set(status);
        active.update(&*self.db).await.expect("failed to update order");
    }

    /// Inserts a bare order row directly, e.g. to plant an order-number
    /// collision.
    pub async fn seed_order(&self, order_number: &str, customer_id: Uuid) -> order::Model {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.to_string()),
            customer_id: Set(customer_id),
            status: Set(order::OrderStatus::Pending),
            payment_status: Set(order::PaymentStatus::Pending),
            subtotal: Set(Decimal::ZERO),
            tax: Set(Decimal::ZERO),
            shipping_cost: Set(Decimal::ZERO),
            discount: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            shipping_address: Set(json!({})),
            billing_address: Set(json!({})),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed order")
    }
}

pub fn test_address() -> Address {
    Address {
        name: "Ada Lovelace".to_string(),
        line1: "12 Analytical Way".to_string(),
        line2: None,
        city: "London".to_string(),
        region: None,
        postal_code: "N1 9GU".to_string(),
        country: "GB".to_string(),
        phone: None,
    }
}

/// Checkout request with zero tax/shipping/discount.
pub fn checkout_request(customer_id: Uuid) -> CheckoutRequest {
    CheckoutRequest {
        customer_id,
        shipping_address: test_address(),
        billing_address: None,
        notes: None,
        tax: Decimal::ZERO,
        shipping_cost: Decimal::ZERO,
        discount: Decimal::ZERO,
    }
}
