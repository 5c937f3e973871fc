use crate::{
    entities::{cart_item, order_item, product, product_variant, CartItem, Product, ProductVariant},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
};
use tracing::warn;
use uuid::Uuid;

/// A cart line joined with the catalog rows it references.
///
/// Snapshot source for order items; when a variant is selected its price and
/// stock counter take precedence over the parent product's.
#[derive(Debug, Clone)]
pub struct ResolvedCartLine {
    pub item: cart_item::Model,
    pub product: product::Model,
    pub variant: Option<product_variant::Model>,
}

impl ResolvedCartLine {
    pub fn unit_price(&self) -> Decimal {
        self.variant
            .as_ref()
            .map_or(self.product.price, |v| v.price)
    }

    pub fn available_stock(&self) -> i32 {
        self.variant
            .as_ref()
            .map_or(self.product.stock_quantity, |v| v.stock_quantity)
    }

    pub fn display_name(&self) -> &str {
        self.variant
            .as_ref()
            .map_or(self.product.name.as_str(), |v| v.name.as_str())
    }

    pub fn sku(&self) -> &str {
        self.variant
            .as_ref()
            .map_or(self.product.sku.as_str(), |v| v.sku.as_str())
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price() * Decimal::from(self.item.quantity)
    }
}

/// Loads a cart's items together with their product/variant rows.
///
/// Runs on whatever connection the caller supplies, so checkout can
/// re-resolve inside its own transaction.
pub async fn resolve_cart_lines<C>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<ResolvedCartLine>, ServiceError>
where
    C: ConnectionTrait,
{
    let items = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?;

    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = Product::find_by_id(item.product_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} no longer exists", item.product_id))
            })?;

        let variant = match item.variant_id {
            Some(variant_id) => Some(
                ProductVariant::find_by_id(variant_id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Variant {} no longer exists",
                            variant_id
                        ))
                    })?,
            ),
            None => None,
        };

        lines.push(ResolvedCartLine {
            item,
            product,
            variant,
        });
    }

    Ok(lines)
}

/// Validates that every line is satisfiable against current inventory.
///
/// Read-only; safe to call repeatedly and concurrently. Fails closed: an
/// empty cart is itself a validation error.
pub fn validate_cart_lines(lines: &[ResolvedCartLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError("cart is empty".to_string()));
    }

    for line in lines {
        if !line.product.is_available {
            return Err(ServiceError::ValidationError(format!(
                "{} ({}) is currently unavailable",
                line.display_name(),
                line.sku()
            )));
        }

        let available = line.available_stock();
        if available < line.item.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "{} ({}): requested {}, only {} available",
                line.display_name(),
                line.sku(),
                line.item.quantity,
                available
            )));
        }
    }

    Ok(())
}

/// Commits stock for a paid order: decrements each item's variant (or else
/// product) counter by the item quantity.
///
/// Each decrement is conditional on sufficient remaining stock
/// (`WHERE stock_quantity >= qty`), so two racing transactions cannot jointly
/// drive a counter negative; an unaffected row aborts the caller's
/// transaction.
pub async fn decrement_stock<C>(conn: &C, items: &[order_item::Model]) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();

    for item in items {
        let rows_affected = match item.variant_id {
            Some(variant_id) => {
                ProductVariant::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity).sub(item.quantity),
                    )
                    .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                    .filter(product_variant::Column::Id.eq(variant_id))
                    .filter(product_variant::Column::StockQuantity.gte(item.quantity))
                    .exec(conn)
                    .await?
                    .rows_affected
            }
            None => {
                Product::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).sub(item.quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(now))
                    .filter(product::Column::Id.eq(item.product_id))
                    .filter(product::Column::StockQuantity.gte(item.quantity))
                    .exec(conn)
                    .await?
                    .rows_affected
            }
        };

        if rows_affected == 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "{} ({}): unable to commit {} unit(s)",
                item.name, item.sku, item.quantity
            )));
        }
    }

    Ok(())
}

/// Restores stock consumed by a cancelled order: increments each item's
/// variant (or else product) counter by the item quantity.
///
/// A line whose catalog row has since been removed has nothing to restore;
/// that is logged and skipped rather than blocking the cancellation.
pub async fn restore_stock<C>(conn: &C, items: &[order_item::Model]) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();

    for item in items {
        let rows_affected = match item.variant_id {
            Some(variant_id) => {
                ProductVariant::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity).add(item.quantity),
                    )
                    .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                    .filter(product_variant::Column::Id.eq(variant_id))
                    .exec(conn)
                    .await?
                    .rows_affected
            }
            None => {
                Product::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).add(item.quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(now))
                    .filter(product::Column::Id.eq(item.product_id))
                    .exec(conn)
                    .await?
                    .rows_affected
            }
        };

        if rows_affected == 0 {
            warn!(
                order_item_id = %item.id,
                sku = %item.sku,
                "Catalog row gone, skipping stock restoration for line"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn product(stock: i32, available: bool) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Canvas Tote".to_string(),
            sku: "TOTE-01".to_string(),
            price: dec!(35.00),
            stock_quantity: stock,
            is_available: available,
            thumbnail: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn variant(product_id: Uuid, stock: i32) -> product_variant::Model {
        product_variant::Model {
            id: Uuid::new_v4(),
            product_id,
            sku: "TOTE-01-NVY".to_string(),
            name: "Canvas Tote - Navy".to_string(),
            price: dec!(38.00),
            stock_quantity: stock,
            attributes: json!({"color": "navy"}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(
        product: product::Model,
        variant: Option<product_variant::Model>,
        quantity: i32,
    ) -> ResolvedCartLine {
        let item = cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: product.id,
            variant_id: variant.as_ref().map(|v| v.id),
            quantity,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        ResolvedCartLine {
            item,
            product,
            variant,
        }
    }

    #[test]
    fn empty_cart_fails_closed() {
        let err = validate_cart_lines(&[]).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(msg) if msg.contains("empty")));
    }

    #[test]
    fn satisfiable_lines_pass() {
        let p = product(10, true);
        let v = variant(p.id, 4);
        let lines = vec![line(p.clone(), None, 2), line(p, Some(v), 4)];
        assert!(validate_cart_lines(&lines).is_ok());
    }

    #[test]
    fn unavailable_product_is_named() {
        let p = product(10, false);
        let err = validate_cart_lines(&[line(p, None, 1)]).unwrap_err();
        match err {
            ServiceError::ValidationError(msg) => {
                assert!(msg.contains("Canvas Tote"));
                assert!(msg.contains("TOTE-01"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn shortfall_names_variant_and_remaining_quantity() {
        let p = product(10, true);
        let v = variant(p.id, 3);
        let err = validate_cart_lines(&[line(p, Some(v), 5)]).unwrap_err();
        match err {
            ServiceError::InsufficientStock(msg) => {
                assert!(msg.contains("Canvas Tote - Navy"));
                assert!(msg.contains("TOTE-01-NVY"));
                assert!(msg.contains('3'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn variant_stock_takes_precedence_over_product_stock() {
        // Product has plenty, the selected variant does not.
        let p = product(100, true);
        let v = variant(p.id, 1);
        let err = validate_cart_lines(&[line(p, Some(v), 2)]).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
    }

    #[test]
    fn variant_price_drives_line_total() {
        let p = product(10, true);
        let v = variant(p.id, 5);
        let l = line(p, Some(v), 2);
        assert_eq!(l.unit_price(), dec!(38.00));
        assert_eq!(l.line_total(), dec!(76.00));
    }
}
