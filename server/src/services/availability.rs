use serde::Serialize;

use crate::store::{unique_ids, Store};
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    /// Held seats among the requested ones, ascending and without duplicates.
    pub conflicting: Vec<i64>,
}

/// Reports which of `seat_ids` are held (reserved, paid or used) for the
/// screening. Cancelled tickets never block.
///
/// A clean result is advisory: the insert in [`crate::services::reservation`]
/// remains the authority on whether a seat can still be taken.
pub async fn check_availability(
    store: &dyn Store,
    screening_id: i64,
    seat_ids: &[i64],
) -> Result<Availability, AppError> {
    if seat_ids.is_empty() {
        return Err(AppError::ValidationError(
            "At least one seat must be requested".to_string(),
        ));
    }

    let requested = unique_ids(seat_ids);
    let held = store.find_active_tickets(screening_id, &requested).await?;

    let mut conflicting: Vec<i64> = held.into_iter().map(|t| t.seat_id).collect();
    conflicting.sort_unstable();
    conflicting.dedup();

    Ok(Availability {
        available: conflicting.is_empty(),
        conflicting,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SeatRequest, TicketStatus};
    use crate::services::ticket_status::{self, Transition};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;

    async fn seeded() -> (MemoryStore, i64, Vec<i64>) {
        let store = MemoryStore::new();
        let movie = store.add_movie("Alien", 117).await;
        let (hall, seats) = store.add_hall("Hall 2", 1, 5).await;
        let screening = store
            .add_screening(movie.id, hall.id, Utc::now(), Decimal::from(2000))
            .await;
        (store, screening.id, seats.iter().map(|s| s.id).collect())
    }

    #[tokio::test]
    async fn test_free_seats_are_available() {
        let (store, screening_id, seats) = seeded().await;
        let result = check_availability(&store, screening_id, &seats).await.unwrap();
        assert!(result.available);
        assert!(result.conflicting.is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_are_flagged_once() {
        let (store, screening_id, seats) = seeded().await;
        store
            .insert_reserved_tickets(
                1,
                screening_id,
                &[SeatRequest {
                    seat_id: seats[1],
                    price: Decimal::from(2000),
                }],
            )
            .await
            .unwrap();

        let result = check_availability(&store, screening_id, &[seats[1], seats[0], seats[1]])
            .await
            .unwrap();
        assert!(!result.available);
        assert_eq!(result.conflicting, vec![seats[1]]);
    }

    #[tokio::test]
    async fn test_cancelled_tickets_do_not_block() {
        let (store, screening_id, seats) = seeded().await;
        let tickets = store
            .insert_reserved_tickets(
                1,
                screening_id,
                &[SeatRequest {
                    seat_id: seats[0],
                    price: Decimal::from(2000),
                }],
            )
            .await
            .unwrap();
        let Transition::Apply(change) =
            ticket_status::plan(&tickets[0], TicketStatus::Cancelled).unwrap()
        else {
            panic!("reserved ticket should be cancellable");
        };
        store.update_ticket_status(&change).await.unwrap();

        let result = check_availability(&store, screening_id, &seats[..1]).await.unwrap();
        assert!(result.available);
    }

    #[tokio::test]
    async fn test_other_screenings_do_not_conflict() {
        let (store, screening_id, seats) = seeded().await;
        store
            .insert_reserved_tickets(
                1,
                screening_id,
                &[SeatRequest {
                    seat_id: seats[0],
                    price: Decimal::from(2000),
                }],
            )
            .await
            .unwrap();

        let result = check_availability(&store, screening_id + 1000, &seats[..1])
            .await
            .unwrap();
        assert!(result.available);
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let (store, screening_id, _) = seeded().await;
        let err = check_availability(&store, screening_id, &[]).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }
}
