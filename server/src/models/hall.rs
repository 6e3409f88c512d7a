use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Hall {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A seat addressed by `(seat_row, number)`, unique within its hall.
///
/// `seat_type` (standard, vip, disabled) is informational and does not
/// affect pricing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Seat {
    pub id: i64,
    pub hall_id: i64,
    #[serde(rename = "row")]
    pub seat_row: String,
    pub number: i32,
    pub seat_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_row_is_exposed_as_row() {
        let seat = Seat {
            id: 3,
            hall_id: 1,
            seat_row: "C".to_string(),
            number: 7,
            seat_type: "vip".to_string(),
        };
        let json = serde_json::to_value(&seat).unwrap();
        assert_eq!(json["row"], "C");
        assert!(json.get("seat_row").is_none());

        let back: Seat = serde_json::from_value(json).unwrap();
        assert_eq!(back.seat_row, "C");
    }
}
