use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::hall::{Hall, Seat};
use super::payment::Payment;
use super::screening::{Movie, Screening};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Reserved,
    Paid,
    Used,
    Cancelled,
}

impl TicketStatus {
    /// Statuses that hold a seat for a screening.
    pub const ACTIVE: [TicketStatus; 3] = [Self::Reserved, Self::Paid, Self::Used];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Reserved => "reserved",
            TicketStatus::Paid => "paid",
            TicketStatus::Used => "used",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn holds_seat(&self) -> bool {
        !matches!(self, TicketStatus::Cancelled)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, TicketStatus::Paid | TicketStatus::Used)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown ticket status '{0}'")]
pub struct UnknownTicketStatus(pub String);

impl FromStr for TicketStatus {
    type Err = UnknownTicketStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(TicketStatus::Reserved),
            "paid" => Ok(TicketStatus::Paid),
            "used" => Ok(TicketStatus::Used),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(UnknownTicketStatus(other.to_string())),
        }
    }
}

/// One seat for one screening, held by one user.
///
/// `price` is a snapshot of the screening's base price at booking time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub user_id: i64,
    pub screening_id: i64,
    pub seat_id: i64,
    pub order_id: Option<i64>,
    pub price: Decimal,
    pub status: TicketStatus,
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Seat and price requested for a single ticket in a reservation batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeatRequest {
    pub seat_id: i64,
    pub price: Decimal,
}

/// A ticket together with everything needed to render or check it in.
#[derive(Debug, Clone, Serialize)]
pub struct TicketDetails {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub screening: Screening,
    pub movie: Movie,
    pub hall: Hall,
    pub seat: Seat,
    pub payment: Option<Payment>,
}
