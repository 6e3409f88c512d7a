use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::models::{SeatRequest, Ticket, TicketDetails, TicketStatus};
use crate::services::availability::check_availability;
use crate::services::ticket_status::{self, Applied};
use crate::store::Store;
use crate::utils::error::AppError;

fn validate_request(user_id: i64, screening_id: i64, seats: &[SeatRequest]) -> Result<(), AppError> {
    if user_id <= 0 {
        return Err(AppError::ValidationError("userId is required".to_string()));
    }
    if screening_id <= 0 {
        return Err(AppError::ValidationError("screeningId is required".to_string()));
    }
    if seats.is_empty() {
        return Err(AppError::ValidationError(
            "At least one seat must be selected".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(seats.len());
    for seat in seats {
        if !seen.insert(seat.seat_id) {
            return Err(AppError::ValidationError(format!(
                "Seat {} is listed more than once",
                seat.seat_id
            )));
        }
        if seat.price < Decimal::ZERO {
            return Err(AppError::ValidationError(format!(
                "Seat {} has a negative price",
                seat.seat_id
            )));
        }
    }
    Ok(())
}

/// Reserves every seat in `seats` for the user, or none of them.
///
/// Tickets start `reserved` with no order and keep the supplied price. Do not
/// retry blindly after [`AppError::SeatConflict`]: re-check availability first.
pub async fn reserve_tickets(
    store: &dyn Store,
    user_id: i64,
    screening_id: i64,
    seats: &[SeatRequest],
) -> Result<Vec<Ticket>, AppError> {
    validate_request(user_id, screening_id, seats)?;

    let screening = store
        .find_screening(screening_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Screening {} not found", screening_id)))?;

    let seat_ids: Vec<i64> = seats.iter().map(|s| s.seat_id).collect();
    let known = store.find_seats(&seat_ids).await?;
    for seat_id in &seat_ids {
        match known.iter().find(|s| s.id == *seat_id) {
            Some(seat) if seat.hall_id == screening.hall_id => {}
            Some(_) => {
                return Err(AppError::ValidationError(format!(
                    "Seat {} is not in the screening's hall",
                    seat_id
                )))
            }
            None => {
                return Err(AppError::ValidationError(format!(
                    "Seat {} does not exist",
                    seat_id
                )))
            }
        }
    }

    let availability = check_availability(store, screening_id, &seat_ids).await?;
    if !availability.available {
        warn!(
            user_id,
            screening_id,
            conflicting = ?availability.conflicting,
            "Reservation rejected, seats already held"
        );
        return Err(AppError::SeatConflict {
            seat_ids: availability.conflicting,
        });
    }

    let tickets = store
        .insert_reserved_tickets(user_id, screening_id, seats)
        .await?;

    info!(
        user_id,
        screening_id,
        ticket_ids = ?tickets.iter().map(|t| t.id).collect::<Vec<_>>(),
        "Tickets reserved"
    );
    Ok(tickets)
}

pub async fn reserve_ticket(
    store: &dyn Store,
    user_id: i64,
    screening_id: i64,
    seat_id: i64,
    price: Decimal,
) -> Result<Ticket, AppError> {
    let mut tickets =
        reserve_tickets(store, user_id, screening_id, &[SeatRequest { seat_id, price }]).await?;
    tickets
        .pop()
        .ok_or_else(|| AppError::InternalServerError("Reservation returned no ticket".to_string()))
}

/// Reserves `seat_ids` at the screening's base price. Used by the booking
/// endpoint, which never takes a price from the client.
pub async fn reserve_at_base_price(
    store: &dyn Store,
    user_id: i64,
    screening_id: i64,
    seat_ids: &[i64],
) -> Result<Vec<Ticket>, AppError> {
    let screening = store
        .find_screening(screening_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Screening {} not found", screening_id)))?;
    let seats: Vec<SeatRequest> = seat_ids
        .iter()
        .map(|seat_id| SeatRequest {
            seat_id: *seat_id,
            price: screening.base_price,
        })
        .collect();
    reserve_tickets(store, user_id, screening_id, &seats).await
}

pub async fn list_user_tickets(store: &dyn Store, user_id: i64) -> Result<Vec<TicketDetails>, AppError> {
    Ok(store.list_user_tickets(user_id).await?)
}

/// Reserved tickets of the user for these seats that never got linked to an
/// order, newest first and at most one per requested seat.
pub async fn find_unlinked_reservations(
    store: &dyn Store,
    user_id: i64,
    screening_id: i64,
    seat_ids: &[i64],
) -> Result<Vec<Ticket>, AppError> {
    if seat_ids.is_empty() {
        return Ok(Vec::new());
    }
    let tickets = store
        .find_unlinked_reservations(user_id, screening_id, seat_ids, seat_ids.len())
        .await?;
    Ok(tickets)
}

/// Cancels one of the user's tickets, releasing its seat.
pub async fn cancel_ticket(
    store: &dyn Store,
    user_id: i64,
    ticket_id: i64,
) -> Result<Ticket, AppError> {
    let ticket = store
        .find_ticket(ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;
    if ticket.user_id != user_id {
        warn!(user_id, ticket_id, "Cancellation of another user's ticket refused");
        return Err(AppError::Forbidden("This ticket does not belong to you".to_string()));
    }

    let Applied { ticket, changed } =
        ticket_status::transition(store, &ticket, TicketStatus::Cancelled).await?;
    if changed {
        info!(user_id, ticket_id, "Ticket cancelled");
    }
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Seat;
    use crate::store::MemoryStore;
    use chrono::Utc;

    struct Fixture {
        store: MemoryStore,
        screening_id: i64,
        seats: Vec<Seat>,
        foreign_seat: Seat,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let movie = store.add_movie("Stalker", 161).await;
        let (hall, seats) = store.add_hall("Hall 1", 1, 4).await;
        let (_, other_seats) = store.add_hall("Hall 2", 1, 1).await;
        let screening = store
            .add_screening(movie.id, hall.id, Utc::now(), Decimal::from(3000))
            .await;
        Fixture {
            store,
            screening_id: screening.id,
            seats,
            foreign_seat: other_seats[0].clone(),
        }
    }

    fn at_3000(seats: &[&Seat]) -> Vec<SeatRequest> {
        seats
            .iter()
            .map(|s| SeatRequest {
                seat_id: s.id,
                price: Decimal::from(3000),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reserves_all_seats_as_unlinked_reserved_tickets() {
        let f = fixture().await;
        let tickets = reserve_tickets(
            &f.store,
            1,
            f.screening_id,
            &at_3000(&[&f.seats[0], &f.seats[1]]),
        )
        .await
        .unwrap();

        assert_eq!(tickets.len(), 2);
        for ticket in &tickets {
            assert_eq!(ticket.status, TicketStatus::Reserved);
            assert_eq!(ticket.order_id, None);
            assert_eq!(ticket.price, Decimal::from(3000));
            assert_eq!(ticket.user_id, 1);
        }
    }

    #[tokio::test]
    async fn test_batch_with_one_taken_seat_creates_nothing() {
        let f = fixture().await;
        reserve_ticket(&f.store, 1, f.screening_id, f.seats[2].id, Decimal::from(3000))
            .await
            .unwrap();

        let err = reserve_tickets(
            &f.store,
            2,
            f.screening_id,
            &at_3000(&[&f.seats[0], &f.seats[1], &f.seats[2]]),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::SeatConflict { ref seat_ids } if seat_ids == &[f.seats[2].id]));
        assert_eq!(f.store.tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_seat_from_another_hall_and_unknown_screening() {
        let f = fixture().await;
        let err = reserve_tickets(&f.store, 1, f.screening_id, &at_3000(&[&f.foreign_seat]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = reserve_tickets(&f.store, 1, 9_999, &at_3000(&[&f.seats[0]]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_missing_fields_and_duplicate_seats() {
        let f = fixture().await;
        let err = reserve_tickets(&f.store, 1, f.screening_id, &[]).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = reserve_tickets(&f.store, 0, f.screening_id, &at_3000(&[&f.seats[0]]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = reserve_tickets(
            &f.store,
            1,
            f.screening_id,
            &at_3000(&[&f.seats[0], &f.seats[0]]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(f.store.tickets().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_releases_seat_and_checks_owner() {
        let f = fixture().await;
        let ticket = reserve_ticket(&f.store, 1, f.screening_id, f.seats[0].id, Decimal::from(3000))
            .await
            .unwrap();

        let err = cancel_ticket(&f.store, 2, ticket.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let cancelled = cancel_ticket(&f.store, 1, ticket.id).await.unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);

        // Cancelling twice is a no-op.
        let again = cancel_ticket(&f.store, 1, ticket.id).await.unwrap();
        assert_eq!(again.status, TicketStatus::Cancelled);

        reserve_ticket(&f.store, 2, f.screening_id, f.seats[0].id, Decimal::from(3000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_base_price_reservation_and_listing() {
        let f = fixture().await;
        let tickets = reserve_at_base_price(&f.store, 7, f.screening_id, &[f.seats[3].id])
            .await
            .unwrap();
        assert_eq!(tickets[0].price, Decimal::from(3000));

        let listed = list_user_tickets(&f.store, 7).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].seat.id, f.seats[3].id);
        assert!(list_user_tickets(&f.store, 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unlinked_reservations_match_reserved_seats() {
        let f = fixture().await;
        let reserved = reserve_tickets(
            &f.store,
            1,
            f.screening_id,
            &at_3000(&[&f.seats[0], &f.seats[1]]),
        )
        .await
        .unwrap();

        let found =
            find_unlinked_reservations(&f.store, 1, f.screening_id, &[f.seats[0].id, f.seats[1].id])
                .await
                .unwrap();
        let mut found_ids: Vec<i64> = found.iter().map(|t| t.id).collect();
        found_ids.sort_unstable();
        let mut reserved_ids: Vec<i64> = reserved.iter().map(|t| t.id).collect();
        reserved_ids.sort_unstable();
        assert_eq!(found_ids, reserved_ids);
    }
}
