//! QR payloads and check-in scan codes.
//!
//! Neither format is signed: anyone who knows an id can forge `ORDER-<id>` or
//! `TICKET-<id>`. Rendering payloads to images is left to the client.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::AppError;

const ORDER_PREFIX: &str = "ORDER-";
const TICKET_PREFIX: &str = "TICKET-";

/// Body of the per-ticket QR code generated at settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQrPayload {
    pub ticket_id: i64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// `base64(JSON{ticketId, timestamp})`.
pub fn ticket_payload(ticket_id: i64, issued_at: DateTime<Utc>) -> Result<String, AppError> {
    let payload = TicketQrPayload {
        ticket_id,
        timestamp: issued_at.timestamp_millis(),
    };
    let json = serde_json::to_vec(&payload)
        .map_err(|e| AppError::InternalServerError(format!("QR payload encoding failed: {}", e)))?;
    Ok(STANDARD.encode(json))
}

pub fn decode_ticket_payload(encoded: &str) -> Option<TicketQrPayload> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCode {
    Order(i64),
    Ticket(i64),
}

impl fmt::Display for ScanCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanCode::Order(id) => write!(f, "{}{}", ORDER_PREFIX, id),
            ScanCode::Ticket(id) => write!(f, "{}{}", TICKET_PREFIX, id),
        }
    }
}

impl FromStr for ScanCode {
    type Err = AppError;

    /// Accepts `ORDER-<id>`, `TICKET-<id>`, or a ticket QR payload.
    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let code = code.trim();
        let invalid = || AppError::ValidationError(format!("Unrecognized scan code '{}'", code));

        let parse_id = |raw: &str| raw.parse::<i64>().ok().filter(|id| *id > 0);

        if let Some(raw) = code.strip_prefix(ORDER_PREFIX) {
            return parse_id(raw).map(ScanCode::Order).ok_or_else(invalid);
        }
        if let Some(raw) = code.strip_prefix(TICKET_PREFIX) {
            return parse_id(raw).map(ScanCode::Ticket).ok_or_else(invalid);
        }
        decode_ticket_payload(code)
            .map(|payload| ScanCode::Ticket(payload.ticket_id))
            .ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ticket_payload_is_base64_json() {
        let issued = Utc.with_ymd_and_hms(2024, 5, 1, 18, 30, 0).unwrap();
        let encoded = ticket_payload(12, issued).unwrap();

        let json = String::from_utf8(STANDARD.decode(&encoded).unwrap()).unwrap();
        assert_eq!(json, r#"{"ticketId":12,"timestamp":1714588200000}"#);
        assert_eq!(
            decode_ticket_payload(&encoded),
            Some(TicketQrPayload {
                ticket_id: 12,
                timestamp: 1714588200000
            })
        );
    }

    #[test]
    fn test_parses_prefixed_codes() {
        assert_eq!("ORDER-15".parse::<ScanCode>().unwrap(), ScanCode::Order(15));
        assert_eq!(" TICKET-3 ".parse::<ScanCode>().unwrap(), ScanCode::Ticket(3));
        assert_eq!(ScanCode::Order(15).to_string(), "ORDER-15");
    }

    #[test]
    fn test_accepts_ticket_qr_payload() {
        let encoded = ticket_payload(44, Utc::now()).unwrap();
        assert_eq!(encoded.parse::<ScanCode>().unwrap(), ScanCode::Ticket(44));
    }

    #[test]
    fn test_rejects_garbage() {
        for code in ["", "ORDER-", "ORDER-abc", "TICKET--1", "SEAT-4", "not base64!"] {
            assert!(
                matches!(code.parse::<ScanCode>(), Err(AppError::ValidationError(_))),
                "{code:?} should be rejected"
            );
        }
    }
}
