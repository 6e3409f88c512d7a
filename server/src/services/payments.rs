//! Simulated settlement. No gateway is called and every payment completes;
//! the only failures are ownership and double-payment checks.

use std::collections::HashSet;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{NewPayment, OrderDetails, OrderItem, Payment, Ticket, TicketStatus};
use crate::services::qr;
use crate::services::ticket_status::{self, Transition};
use crate::store::Store;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct TicketQr {
    pub ticket_id: i64,
    pub qr_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub payments: Vec<Payment>,
    pub qr_codes: Vec<TicketQr>,
}

fn validate_method(method: &str) -> Result<String, AppError> {
    let method = method.trim();
    if method.is_empty() {
        return Err(AppError::ValidationError(
            "Payment method is required".to_string(),
        ));
    }
    Ok(method.to_lowercase())
}

/// Synthetic processor reference shared by every ticket in one checkout.
fn checkout_reference() -> String {
    format!("TXN-{}", Uuid::new_v4().simple())
}

async fn settle(
    store: &dyn Store,
    ticket: &Ticket,
    amount: Decimal,
    method: &str,
    reference: &str,
) -> Result<(Payment, TicketQr), AppError> {
    let change = match ticket_status::plan(ticket, TicketStatus::Paid)? {
        Transition::Apply(change) => change,
        Transition::Unchanged => {
            return Err(AppError::AlreadyPaid(format!(
                "Ticket {} is already settled",
                ticket.id
            )))
        }
    };

    let qr_code = qr::ticket_payload(ticket.id, Utc::now())?;
    let payment = NewPayment {
        ticket_id: ticket.id,
        amount,
        method: method.to_string(),
        transaction_id: format!("{}-{}", reference, ticket.id),
    };

    let recorded = store.settle_ticket(&change, &payment, &qr_code).await?;
    ticket_status::record(&change);

    Ok((
        recorded,
        TicketQr {
            ticket_id: ticket.id,
            qr_code,
        },
    ))
}

/// Splits what the order still owes across its pending tickets.
///
/// Each pending ticket carries its own price plus the product lines attached
/// to it. The rest of the outstanding balance (order-level lines, lines on
/// tickets that were paid on their own) lands on the first pending ticket,
/// so the payments of a fully settled order add up to its total.
fn allocate(details: &OrderDetails, pending: &[&Ticket]) -> Vec<Decimal> {
    let live: HashSet<i64> = details
        .tickets
        .iter()
        .filter(|t| t.ticket.status.holds_seat())
        .map(|t| t.ticket.id)
        .collect();
    let billable_lines = details
        .items
        .iter()
        .map(|i| &i.item)
        .filter(|item| item.ticket_id.map_or(true, |id| live.contains(&id)));

    let owed: Decimal = details
        .tickets
        .iter()
        .filter(|t| live.contains(&t.ticket.id))
        .map(|t| t.ticket.price)
        .sum::<Decimal>()
        + billable_lines.clone().map(OrderItem::line_total).sum::<Decimal>();
    let paid: Decimal = details
        .tickets
        .iter()
        .filter_map(|t| t.payment.as_ref())
        .map(|p| p.amount)
        .sum();

    let mut amounts: Vec<Decimal> = pending
        .iter()
        .map(|ticket| {
            let lines: Decimal = billable_lines
                .clone()
                .filter(|item| item.ticket_id == Some(ticket.id))
                .map(OrderItem::line_total)
                .sum();
            ticket.price + lines
        })
        .collect();

    let remainder = owed - paid - amounts.iter().copied().sum::<Decimal>();
    if remainder > Decimal::ZERO {
        if let Some(first) = amounts.first_mut() {
            *first += remainder;
        }
    }
    amounts
}

/// Pays every still-reserved ticket of the order together with its product
/// lines. Tickets already paid or used are left alone, so a partially
/// settled order only charges the rest.
pub async fn pay_for_order(
    store: &dyn Store,
    user_id: i64,
    order_id: i64,
    method: &str,
) -> Result<Settlement, AppError> {
    let method = validate_method(method)?;
    let details = store
        .find_order_details(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;
    if details.order.user_id != user_id {
        warn!(user_id, order_id, "Payment for another user's order refused");
        return Err(AppError::Forbidden("This order does not belong to you".to_string()));
    }

    let pending: Vec<&Ticket> = details
        .tickets
        .iter()
        .map(|t| &t.ticket)
        .filter(|t| t.status == TicketStatus::Reserved)
        .collect();
    if pending.is_empty() {
        return Err(AppError::AlreadyPaid(format!(
            "Order {} has no unpaid tickets",
            order_id
        )));
    }

    if let Some(payment) = details
        .tickets
        .iter()
        .filter(|t| t.ticket.status == TicketStatus::Reserved)
        .find_map(|t| t.payment.as_ref())
    {
        return Err(AppError::PaymentExists(format!(
            "Ticket {} already has a payment",
            payment.ticket_id
        )));
    }

    let amounts = allocate(&details, &pending);
    let reference = checkout_reference();
    let mut settlement = Settlement {
        payments: Vec::with_capacity(pending.len()),
        qr_codes: Vec::with_capacity(pending.len()),
    };
    for (ticket, amount) in pending.iter().zip(amounts) {
        let (payment, qr) = settle(store, ticket, amount, &method, &reference).await?;
        settlement.payments.push(payment);
        settlement.qr_codes.push(qr);
    }

    let charged: Decimal = settlement.payments.iter().map(|p| p.amount).sum();
    info!(
        user_id,
        order_id,
        paid = settlement.payments.len(),
        skipped = details.tickets.len() - settlement.payments.len(),
        %charged,
        reference = %reference,
        "Order settled"
    );
    Ok(settlement)
}

/// Pays a single ticket. `amount` must match the ticket's booked price.
pub async fn pay_for_ticket(
    store: &dyn Store,
    user_id: i64,
    ticket_id: i64,
    amount: Decimal,
    method: &str,
) -> Result<Settlement, AppError> {
    let method = validate_method(method)?;
    let ticket = store
        .find_ticket(ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;
    if ticket.user_id != user_id {
        warn!(user_id, ticket_id, "Payment for another user's ticket refused");
        return Err(AppError::Forbidden("This ticket does not belong to you".to_string()));
    }
    if ticket.status.is_settled() {
        return Err(AppError::AlreadyPaid(format!(
            "Ticket {} is already paid",
            ticket_id
        )));
    }
    if !store.find_payments(&[ticket_id]).await?.is_empty() {
        return Err(AppError::PaymentExists(format!(
            "Ticket {} already has a payment",
            ticket_id
        )));
    }
    if amount != ticket.price {
        return Err(AppError::ValidationError(format!(
            "Amount {} does not match ticket price {}",
            amount, ticket.price
        )));
    }

    let (payment, qr) = settle(store, &ticket, amount, &method, &checkout_reference()).await?;
    info!(user_id, ticket_id, %amount, "Ticket settled");
    Ok(Settlement {
        payments: vec![payment],
        qr_codes: vec![qr],
    })
}
