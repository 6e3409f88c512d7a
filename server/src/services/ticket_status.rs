//! Ticket status machine.
//!
//! ```text
//! reserved ──> paid ──> used
//!    │          │
//!    └──────────┴─────> cancelled
//! ```
//!
//! `used -> used` and `cancelled -> cancelled` are no-ops. Everything else,
//! including any backward move, is rejected. A [`StatusChange`] can only be
//! built here, and the store only writes status from one, so every transition
//! passes through [`plan`].

use tracing::info;

use crate::models::{Ticket, TicketStatus};
use crate::store::{Store, StoreError};
use crate::utils::error::AppError;

/// A validated transition for one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    ticket_id: i64,
    from: TicketStatus,
    to: TicketStatus,
}

impl StatusChange {
    pub fn ticket_id(&self) -> i64 {
        self.ticket_id
    }

    pub fn from(&self) -> TicketStatus {
        self.from
    }

    pub fn to(&self) -> TicketStatus {
        self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Apply(StatusChange),
    /// Target already reached on a terminal state.
    Unchanged,
}

pub fn is_allowed(from: TicketStatus, to: TicketStatus) -> bool {
    use crate::models::TicketStatus::*;
    matches!(
        (from, to),
        (Reserved, Paid) | (Paid, Used) | (Reserved, Cancelled) | (Paid, Cancelled)
    )
}

pub fn plan(ticket: &Ticket, to: TicketStatus) -> Result<Transition, AppError> {
    let from = ticket.status;

    if from == to && matches!(to, TicketStatus::Used | TicketStatus::Cancelled) {
        return Ok(Transition::Unchanged);
    }

    if !is_allowed(from, to) {
        return Err(AppError::InvalidTransition { from, to });
    }

    Ok(Transition::Apply(StatusChange {
        ticket_id: ticket.id,
        from,
        to,
    }))
}

/// Outcome of [`transition`]: the ticket as stored afterwards and whether
/// this call changed it.
#[derive(Debug, Clone)]
pub struct Applied {
    pub ticket: Ticket,
    pub changed: bool,
}

/// Plans and persists a transition.
///
/// If another request moved the ticket first, the fresh row is re-planned
/// once so a concurrent duplicate (two check-ins of the same ticket) resolves
/// to a no-op instead of an error.
pub async fn transition(
    store: &dyn Store,
    ticket: &Ticket,
    to: TicketStatus,
) -> Result<Applied, AppError> {
    let change = match plan(ticket, to)? {
        Transition::Unchanged => {
            return Ok(Applied {
                ticket: ticket.clone(),
                changed: false,
            })
        }
        Transition::Apply(change) => change,
    };

    match store.update_ticket_status(&change).await {
        Ok(updated) => {
            record(&change);
            Ok(Applied {
                ticket: updated,
                changed: true,
            })
        }
        Err(StoreError::StaleStatus { ticket_id }) => {
            let current = store
                .find_ticket(ticket_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;
            match plan(&current, to)? {
                Transition::Unchanged => Ok(Applied {
                    ticket: current,
                    changed: false,
                }),
                Transition::Apply(_) => Err(StoreError::StaleStatus { ticket_id }.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Audit line for a persisted transition.
pub fn record(change: &StatusChange) {
    info!(
        ticket_id = change.ticket_id,
        from = %change.from,
        to = %change.to,
        "Ticket status transition"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use crate::models::TicketStatus::*;

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket {
            id: 7,
            user_id: 1,
            screening_id: 1,
            seat_id: 1,
            order_id: None,
            price: Decimal::from(3000),
            status,
            qr_code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_forward_transitions_are_applied() {
        for (from, to) in [
            (Reserved, Paid),
            (Paid, Used),
            (Reserved, Cancelled),
            (Paid, Cancelled),
        ] {
            match plan(&ticket(from), to).unwrap() {
                Transition::Apply(change) => {
                    assert_eq!(change.ticket_id(), 7);
                    assert_eq!(change.from(), from);
                    assert_eq!(change.to(), to);
                }
                Transition::Unchanged => panic!("{from} -> {to} should apply"),
            }
        }
    }

    #[test]
    fn test_terminal_self_transitions_are_noops() {
        assert_eq!(plan(&ticket(Used), Used).unwrap(), Transition::Unchanged);
        assert_eq!(
            plan(&ticket(Cancelled), Cancelled).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_backward_and_skipping_transitions_are_rejected() {
        for (from, to) in [
            (Paid, Reserved),
            (Used, Paid),
            (Used, Reserved),
            (Used, Cancelled),
            (Cancelled, Reserved),
            (Cancelled, Paid),
            (Cancelled, Used),
            (Reserved, Used),
            (Reserved, Reserved),
            (Paid, Paid),
        ] {
            let err = plan(&ticket(from), to).unwrap_err();
            assert!(
                matches!(err, AppError::InvalidTransition { from: f, to: t } if f == from && t == to),
                "{from} -> {to} should be rejected"
            );
        }
    }
}
