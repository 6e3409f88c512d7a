use serde::Serialize;
use tracing::info;

use crate::models::{OrderDetails, Ticket, TicketDetails, TicketStatus};
use crate::services::qr::ScanCode;
use crate::services::ticket_status::{self, Applied};
use crate::store::Store;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "entity", rename_all = "lowercase")]
pub enum ScanTarget {
    Order(OrderDetails),
    Ticket(TicketDetails),
}

pub async fn resolve_scan_code(store: &dyn Store, code: &str) -> Result<ScanTarget, AppError> {
    match code.parse::<ScanCode>()? {
        ScanCode::Order(order_id) => store
            .find_order_details(order_id)
            .await?
            .map(ScanTarget::Order)
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id))),
        ScanCode::Ticket(ticket_id) => store
            .find_ticket_details(ticket_id)
            .await?
            .map(ScanTarget::Ticket)
            .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id))),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketCheckIn {
    pub ticket: Ticket,
    pub already_used: bool,
}

/// Checks in a paid ticket. A ticket that is already used checks in again
/// without side effects; reserved and cancelled tickets are refused.
pub async fn mark_ticket_used(store: &dyn Store, ticket_id: i64) -> Result<TicketCheckIn, AppError> {
    let ticket = store
        .find_ticket(ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;

    let Applied { ticket, changed } =
        ticket_status::transition(store, &ticket, TicketStatus::Used).await?;
    if changed {
        info!(ticket_id, "Ticket checked in");
    }
    Ok(TicketCheckIn {
        ticket,
        already_used: !changed,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderCheckIn {
    pub order_id: i64,
    /// Tickets moved from paid to used by this call.
    pub marked: usize,
    pub already_used: usize,
    /// Reserved or cancelled tickets left untouched.
    pub skipped: usize,
}

/// Checks in every paid ticket of an order, skipping the rest.
pub async fn mark_all_tickets_in_order_used(
    store: &dyn Store,
    order_id: i64,
) -> Result<OrderCheckIn, AppError> {
    if store.find_order(order_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Order {} not found", order_id)));
    }

    let mut summary = OrderCheckIn {
        order_id,
        ..OrderCheckIn::default()
    };
    for ticket in store.order_tickets(order_id).await? {
        match ticket.status {
            TicketStatus::Paid => {
                let applied = ticket_status::transition(store, &ticket, TicketStatus::Used).await?;
                if applied.changed {
                    summary.marked += 1;
                } else {
                    summary.already_used += 1;
                }
            }
            TicketStatus::Used => summary.already_used += 1,
            TicketStatus::Reserved | TicketStatus::Cancelled => summary.skipped += 1,
        }
    }

    info!(
        order_id,
        marked = summary.marked,
        already_used = summary.already_used,
        skipped = summary.skipped,
        "Order checked in"
    );
    Ok(summary)
}
