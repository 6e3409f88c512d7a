use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const PAYMENT_STATUS_COMPLETED: &str = "completed";

/// Settlement record for exactly one ticket (unique on `ticket_id`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub ticket_id: i64,
    pub amount: Decimal,
    pub method: String,
    pub status: String,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub ticket_id: i64,
    pub amount: Decimal,
    pub method: String,
    pub transaction_id: String,
}
