//! Storage handle for the reservation core.
//!
//! Every write that must be atomic (batch reservation, order creation,
//! settlement, status updates) is a single trait method so each backend can
//! run it inside one transaction. Ticket status is only ever written through
//! a [`StatusChange`] produced by the status machine.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    Hall, Movie, NewOrder, NewOrderItem, NewPayment, Order, OrderDetails, Payment, Product,
    Screening, Seat, SeatRequest, Ticket, TicketDetails,
};
use crate::services::ticket_status::StatusChange;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("seats already held: {seat_ids:?}")]
    SeatTaken { seat_ids: Vec<i64> },

    #[error("ticket {ticket_id} already has a payment")]
    DuplicatePayment { ticket_id: i64 },

    #[error("ticket {ticket_id} status changed concurrently")]
    StaleStatus { ticket_id: i64 },

    #[error("missing related row: {0}")]
    MissingRelation(String),

    #[error("undecodable row: {0}")]
    Decode(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_screening(&self, screening_id: i64) -> StoreResult<Option<Screening>>;

    async fn find_seats(&self, seat_ids: &[i64]) -> StoreResult<Vec<Seat>>;

    /// Active products among `product_ids`; unknown and inactive ids are omitted.
    async fn find_active_products(&self, product_ids: &[i64]) -> StoreResult<Vec<Product>>;

    /// Tickets for `screening_id` on any of `seat_ids` whose status holds the seat.
    async fn find_active_tickets(
        &self,
        screening_id: i64,
        seat_ids: &[i64],
    ) -> StoreResult<Vec<Ticket>>;

    /// Inserts one `reserved` ticket per seat, all or nothing.
    ///
    /// Fails with [`StoreError::SeatTaken`] when any seat is already held,
    /// including when a concurrent insert wins the race.
    async fn insert_reserved_tickets(
        &self,
        user_id: i64,
        screening_id: i64,
        seats: &[SeatRequest],
    ) -> StoreResult<Vec<Ticket>>;

    /// `reserved` tickets not yet linked to an order, newest first (id breaks
    /// ties), at most `limit` rows.
    async fn find_unlinked_reservations(
        &self,
        user_id: i64,
        screening_id: i64,
        seat_ids: &[i64],
        limit: usize,
    ) -> StoreResult<Vec<Ticket>>;

    async fn find_ticket(&self, ticket_id: i64) -> StoreResult<Option<Ticket>>;

    async fn find_ticket_details(&self, ticket_id: i64) -> StoreResult<Option<TicketDetails>>;

    async fn list_user_tickets(&self, user_id: i64) -> StoreResult<Vec<TicketDetails>>;

    /// Creates the order with its items and links `order.ticket_ids` to it.
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order>;

    async fn find_order(&self, order_id: i64) -> StoreResult<Option<Order>>;

    async fn find_order_details(&self, order_id: i64) -> StoreResult<Option<OrderDetails>>;

    async fn order_tickets(&self, order_id: i64) -> StoreResult<Vec<Ticket>>;

    /// Deletes every item of the order, inserts `items` and stores `total_amount`.
    async fn replace_order_items(
        &self,
        order_id: i64,
        items: &[NewOrderItem],
        total_amount: Decimal,
    ) -> StoreResult<()>;

    async fn find_payments(&self, ticket_ids: &[i64]) -> StoreResult<Vec<Payment>>;

    /// Records the payment, applies the `paid` transition and stores the QR
    /// payload in one unit.
    async fn settle_ticket(
        &self,
        change: &StatusChange,
        payment: &NewPayment,
        qr_code: &str,
    ) -> StoreResult<Payment>;

    /// Compare-and-set on the ticket status; [`StoreError::StaleStatus`] when
    /// the stored status no longer matches `change.from()`.
    async fn update_ticket_status(&self, change: &StatusChange) -> StoreResult<Ticket>;
}

/// Catalog rows referenced by a set of tickets.
#[derive(Debug, Default)]
pub(crate) struct TicketRelations {
    pub screenings: HashMap<i64, Screening>,
    pub movies: HashMap<i64, Movie>,
    pub halls: HashMap<i64, Hall>,
    pub seats: HashMap<i64, Seat>,
    pub payments: HashMap<i64, Payment>,
}

impl TicketRelations {
    pub(crate) fn assemble(&self, tickets: Vec<Ticket>) -> StoreResult<Vec<TicketDetails>> {
        tickets
            .into_iter()
            .map(|ticket| {
                let screening = lookup(&self.screenings, ticket.screening_id, "screening")?;
                let movie = lookup(&self.movies, screening.movie_id, "movie")?;
                let hall = lookup(&self.halls, screening.hall_id, "hall")?;
                let seat = lookup(&self.seats, ticket.seat_id, "seat")?;
                let payment = self.payments.get(&ticket.id).cloned();
                Ok(TicketDetails {
                    ticket,
                    screening,
                    movie,
                    hall,
                    seat,
                    payment,
                })
            })
            .collect()
    }
}

fn lookup<T: Clone>(rows: &HashMap<i64, T>, id: i64, what: &str) -> StoreResult<T> {
    rows.get(&id)
        .cloned()
        .ok_or_else(|| StoreError::MissingRelation(format!("{} {}", what, id)))
}

/// Deduplicated ids, preserving first-seen order.
pub(crate) fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
