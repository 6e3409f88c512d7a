use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::product::Product;
use super::ticket::TicketDetails;

pub const ORDER_STATUS_PENDING: &str = "pending";

/// Billing aggregate for one checkout.
///
/// `total_amount` is always recomputed server-side from ticket prices and
/// product line snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub total_amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A product line. `ticket_id` scopes the line to one seat when set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub ticket_id: Option<i64>,
    pub quantity: i32,
    pub price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Product requested by the client, optionally attached to one of the seats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductLine {
    pub product_id: i64,
    pub quantity: i32,
    #[serde(default)]
    pub seat_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub ticket_id: Option<i64>,
    pub quantity: i32,
    pub price: Decimal,
}

impl NewOrderItem {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub total_amount: Decimal,
    pub items: Vec<NewOrderItem>,
    pub ticket_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemDetails {
    #[serde(flatten)]
    pub item: OrderItem,
    pub product: Product,
}

/// The full order graph returned to callers after every order mutation.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub tickets: Vec<TicketDetails>,
    pub items: Vec<OrderItemDetails>,
}
