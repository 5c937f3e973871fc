use crate::{entities::Order, errors::ServiceError};
use chrono::{DateTime, Datelike, Utc};
use sea_orm::{ConnectionTrait, EntityTrait, PaginatorTrait};

/// Formats an order number as `ORD-YYMM-NNNNN`.
pub fn format_order_number(date: DateTime<Utc>, sequence: u64) -> String {
    format!(
        "ORD-{:02}{:02}-{:05}",
        date.year() % 100,
        date.month(),
        sequence
    )
}

/// Produces a candidate order number from the current order count.
///
/// The count-derived sequence is only a candidate: two concurrent checkouts
/// can read the same count, so uniqueness comes from the UNIQUE constraint on
/// `orders.order_number`, and the checkout writer retries the whole
/// transaction with a bumped `offset` when the insert reports a conflict.
pub async fn next_candidate<C>(conn: &C, offset: u64) -> Result<String, ServiceError>
where
    C: ConnectionTrait,
{
    let count = Order::find().count(conn).await?;
    Ok(format_order_number(Utc::now(), count + 1 + offset))
}
