use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A movie shown in a hall over `[start_time, end_time)`.
///
/// Tickets snapshot `base_price` at booking time, so later edits to the
/// screening never reprice existing tickets.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Screening {
    pub id: i64,
    pub movie_id: i64,
    pub hall_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub base_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
