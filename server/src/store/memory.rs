//! In-memory store used by the test suite and local experiments.
//!
//! A single mutex guards all tables, so every trait method is atomic the same
//! way a Postgres transaction is.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::{unique_ids, Store, StoreError, StoreResult, TicketRelations};
use crate::models::order::ORDER_STATUS_PENDING;
use crate::models::payment::PAYMENT_STATUS_COMPLETED;
use crate::models::{
    Hall, Movie, NewOrder, NewOrderItem, NewPayment, Order, OrderDetails, OrderItem,
    OrderItemDetails, Payment, Product, Screening, Seat, SeatRequest, Ticket, TicketDetails,
    TicketStatus,
};
use crate::services::ticket_status::StatusChange;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    movies: BTreeMap<i64, Movie>,
    halls: BTreeMap<i64, Hall>,
    seats: BTreeMap<i64, Seat>,
    screenings: BTreeMap<i64, Screening>,
    products: BTreeMap<i64, Product>,
    tickets: BTreeMap<i64, Ticket>,
    orders: BTreeMap<i64, Order>,
    order_items: BTreeMap<i64, OrderItem>,
    payments: BTreeMap<i64, Payment>,
    fail_order_inserts: bool,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn relations(&self, tickets: &[Ticket]) -> TicketRelations {
        let mut relations = TicketRelations::default();
        for ticket in tickets {
            if let Some(screening) = self.screenings.get(&ticket.screening_id) {
                if let Some(movie) = self.movies.get(&screening.movie_id) {
                    relations.movies.insert(movie.id, movie.clone());
                }
                if let Some(hall) = self.halls.get(&screening.hall_id) {
                    relations.halls.insert(hall.id, hall.clone());
                }
                relations.screenings.insert(screening.id, screening.clone());
            }
            if let Some(seat) = self.seats.get(&ticket.seat_id) {
                relations.seats.insert(seat.id, seat.clone());
            }
        }
        for payment in self.payments.values() {
            if tickets.iter().any(|t| t.id == payment.ticket_id) {
                relations.payments.insert(payment.ticket_id, payment.clone());
            }
        }
        relations
    }

    fn ticket_details(&self, tickets: Vec<Ticket>) -> StoreResult<Vec<TicketDetails>> {
        self.relations(&tickets).assemble(tickets)
    }

    fn insert_items(&mut self, order_id: i64, items: &[NewOrderItem]) {
        for item in items {
            let id = self.next_id();
            self.order_items.insert(
                id,
                OrderItem {
                    id,
                    order_id,
                    product_id: item.product_id,
                    ticket_id: item.ticket_id,
                    quantity: item.quantity,
                    price: item.price,
                },
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_movie(&self, title: &str, duration_minutes: i32) -> Movie {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let now = Utc::now();
        let movie = Movie {
            id,
            title: title.to_string(),
            description: None,
            duration_minutes,
            created_at: now,
            updated_at: now,
        };
        tables.movies.insert(id, movie.clone());
        movie
    }

    /// Adds a hall with `rows` rows (`A`, `B`, ...) of `per_row` standard seats.
    pub async fn add_hall(&self, name: &str, rows: u8, per_row: i32) -> (Hall, Vec<Seat>) {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let now = Utc::now();
        let hall = Hall {
            id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.halls.insert(id, hall.clone());

        let mut seats = Vec::new();
        for row in 0..rows {
            let label = char::from(b'A' + row).to_string();
            for number in 1..=per_row {
                let seat_id = tables.next_id();
                let seat = Seat {
                    id: seat_id,
                    hall_id: id,
                    seat_row: label.clone(),
                    number,
                    seat_type: "standard".to_string(),
                };
                tables.seats.insert(seat_id, seat.clone());
                seats.push(seat);
            }
        }
        (hall, seats)
    }

    pub async fn add_screening(
        &self,
        movie_id: i64,
        hall_id: i64,
        start_time: DateTime<Utc>,
        base_price: Decimal,
    ) -> Screening {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let duration = tables
            .movies
            .get(&movie_id)
            .map(|m| i64::from(m.duration_minutes))
            .unwrap_or(120);
        let now = Utc::now();
        let screening = Screening {
            id,
            movie_id,
            hall_id,
            start_time,
            end_time: start_time + Duration::minutes(duration),
            base_price,
            created_at: now,
            updated_at: now,
        };
        tables.screenings.insert(id, screening.clone());
        screening
    }

    pub async fn add_product(&self, name: &str, price: Decimal, is_active: bool) -> Product {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let now = Utc::now();
        let product = Product {
            id,
            name: name.to_string(),
            category: "snacks".to_string(),
            price,
            is_active,
            created_at: now,
            updated_at: now,
        };
        tables.products.insert(id, product.clone());
        product
    }

    /// Makes every subsequent `create_order` fail with a backend error.
    pub async fn fail_order_inserts(&self, fail: bool) {
        self.tables.lock().await.fail_order_inserts = fail;
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        self.tables.lock().await.tickets.values().cloned().collect()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.tables.lock().await.orders.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.lock().await.payments.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_screening(&self, screening_id: i64) -> StoreResult<Option<Screening>> {
        Ok(self.tables.lock().await.screenings.get(&screening_id).cloned())
    }

    async fn find_seats(&self, seat_ids: &[i64]) -> StoreResult<Vec<Seat>> {
        let tables = self.tables.lock().await;
        Ok(unique_ids(seat_ids)
            .into_iter()
            .filter_map(|id| tables.seats.get(&id).cloned())
            .collect())
    }

    async fn find_active_products(&self, product_ids: &[i64]) -> StoreResult<Vec<Product>> {
        let tables = self.tables.lock().await;
        Ok(unique_ids(product_ids)
            .into_iter()
            .filter_map(|id| tables.products.get(&id))
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn find_active_tickets(
        &self,
        screening_id: i64,
        seat_ids: &[i64],
    ) -> StoreResult<Vec<Ticket>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tickets
            .values()
            .filter(|t| {
                t.screening_id == screening_id
                    && seat_ids.contains(&t.seat_id)
                    && t.status.holds_seat()
            })
            .cloned()
            .collect())
    }

    async fn insert_reserved_tickets(
        &self,
        user_id: i64,
        screening_id: i64,
        seats: &[SeatRequest],
    ) -> StoreResult<Vec<Ticket>> {
        let mut tables = self.tables.lock().await;

        let mut requested = HashSet::new();
        let mut taken: Vec<i64> = seats
            .iter()
            .filter(|s| !requested.insert(s.seat_id))
            .map(|s| s.seat_id)
            .collect();
        taken.extend(tables.tickets.values().filter_map(|t| {
            (t.screening_id == screening_id
                && requested.contains(&t.seat_id)
                && t.status.holds_seat())
            .then_some(t.seat_id)
        }));
        if !taken.is_empty() {
            taken.sort_unstable();
            taken.dedup();
            return Err(StoreError::SeatTaken { seat_ids: taken });
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(seats.len());
        for seat in seats {
            let id = tables.next_id();
            let ticket = Ticket {
                id,
                user_id,
                screening_id,
                seat_id: seat.seat_id,
                order_id: None,
                price: seat.price,
                status: TicketStatus::Reserved,
                qr_code: None,
                created_at: now,
                updated_at: now,
            };
            tables.tickets.insert(id, ticket.clone());
            created.push(ticket);
        }
        Ok(created)
    }

    async fn find_unlinked_reservations(
        &self,
        user_id: i64,
        screening_id: i64,
        seat_ids: &[i64],
        limit: usize,
    ) -> StoreResult<Vec<Ticket>> {
        let tables = self.tables.lock().await;
        let mut matches: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| {
                t.user_id == user_id
                    && t.screening_id == screening_id
                    && seat_ids.contains(&t.seat_id)
                    && t.status == TicketStatus::Reserved
                    && t.order_id.is_none()
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn find_ticket(&self, ticket_id: i64) -> StoreResult<Option<Ticket>> {
        Ok(self.tables.lock().await.tickets.get(&ticket_id).cloned())
    }

    async fn find_ticket_details(&self, ticket_id: i64) -> StoreResult<Option<TicketDetails>> {
        let tables = self.tables.lock().await;
        match tables.tickets.get(&ticket_id).cloned() {
            Some(ticket) => Ok(tables.ticket_details(vec![ticket])?.pop()),
            None => Ok(None),
        }
    }

    async fn list_user_tickets(&self, user_id: i64) -> StoreResult<Vec<TicketDetails>> {
        let tables = self.tables.lock().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        tables.ticket_details(tickets)
    }

    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        let mut tables = self.tables.lock().await;
        if tables.fail_order_inserts {
            return Err(StoreError::Backend("order insert rejected".to_string()));
        }
        for ticket_id in &order.ticket_ids {
            if !tables.tickets.contains_key(ticket_id) {
                return Err(StoreError::MissingRelation(format!("ticket {}", ticket_id)));
            }
        }

        let id = tables.next_id();
        let now = Utc::now();
        let created = Order {
            id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            status: ORDER_STATUS_PENDING.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.orders.insert(id, created.clone());
        tables.insert_items(id, &order.items);
        for ticket_id in &order.ticket_ids {
            if let Some(ticket) = tables.tickets.get_mut(ticket_id) {
                ticket.order_id = Some(id);
                ticket.updated_at = now;
            }
        }
        Ok(created)
    }

    async fn find_order(&self, order_id: i64) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&order_id).cloned())
    }

    async fn find_order_details(&self, order_id: i64) -> StoreResult<Option<OrderDetails>> {
        let tables = self.tables.lock().await;
        let Some(order) = tables.orders.get(&order_id).cloned() else {
            return Ok(None);
        };

        let order_tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.order_id == Some(order_id))
            .cloned()
            .collect();
        let tickets = tables.ticket_details(order_tickets)?;

        let items = tables
            .order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .map(|item| {
                let product = tables
                    .products
                    .get(&item.product_id)
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::MissingRelation(format!("product {}", item.product_id))
                    })?;
                Ok(OrderItemDetails {
                    item: item.clone(),
                    product,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(OrderDetails {
            order,
            tickets,
            items,
        }))
    }

    async fn order_tickets(&self, order_id: i64) -> StoreResult<Vec<Ticket>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tickets
            .values()
            .filter(|t| t.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn replace_order_items(
        &self,
        order_id: i64,
        items: &[NewOrderItem],
        total_amount: Decimal,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::MissingRelation(format!("order {}", order_id)))?;
        order.total_amount = total_amount;
        order.updated_at = now;

        tables.order_items.retain(|_, item| item.order_id != order_id);
        tables.insert_items(order_id, items);
        Ok(())
    }

    async fn find_payments(&self, ticket_ids: &[i64]) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| ticket_ids.contains(&p.ticket_id))
            .cloned()
            .collect())
    }

    async fn settle_ticket(
        &self,
        change: &StatusChange,
        payment: &NewPayment,
        qr_code: &str,
    ) -> StoreResult<Payment> {
        let mut tables = self.tables.lock().await;
        let ticket_id = change.ticket_id();

        if tables.payments.values().any(|p| p.ticket_id == ticket_id) {
            return Err(StoreError::DuplicatePayment { ticket_id });
        }
        match tables.tickets.get(&ticket_id) {
            Some(ticket) if ticket.status == change.from() => {}
            Some(_) => return Err(StoreError::StaleStatus { ticket_id }),
            None => return Err(StoreError::MissingRelation(format!("ticket {}", ticket_id))),
        }

        let id = tables.next_id();
        let now = Utc::now();
        let recorded = Payment {
            id,
            ticket_id,
            amount: payment.amount,
            method: payment.method.clone(),
            status: PAYMENT_STATUS_COMPLETED.to_string(),
            transaction_id: payment.transaction_id.clone(),
            created_at: now,
        };
        tables.payments.insert(id, recorded.clone());

        if let Some(ticket) = tables.tickets.get_mut(&ticket_id) {
            ticket.status = change.to();
            ticket.qr_code = Some(qr_code.to_string());
            ticket.updated_at = now;
        }
        Ok(recorded)
    }

    async fn update_ticket_status(&self, change: &StatusChange) -> StoreResult<Ticket> {
        let mut tables = self.tables.lock().await;
        let ticket_id = change.ticket_id();
        match tables.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.status == change.from() => {
                ticket.status = change.to();
                ticket.updated_at = Utc::now();
                Ok(ticket.clone())
            }
            Some(_) => Err(StoreError::StaleStatus { ticket_id }),
            None => Err(StoreError::MissingRelation(format!("ticket {}", ticket_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryStore, Screening, Vec<Seat>) {
        let store = MemoryStore::new();
        let movie = store.add_movie("Heat", 170).await;
        let (hall, seats) = store.add_hall("Hall 1", 2, 4).await;
        let screening = store
            .add_screening(movie.id, hall.id, Utc::now(), Decimal::from(2000))
            .await;
        (store, screening, seats)
    }

    fn requests(seats: &[Seat]) -> Vec<SeatRequest> {
        seats
            .iter()
            .map(|s| SeatRequest {
                seat_id: s.id,
                price: Decimal::from(2000),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_insert_rejects_held_seat_without_partial_writes() {
        let (store, screening, seats) = seeded().await;
        store
            .insert_reserved_tickets(1, screening.id, &requests(&seats[2..3]))
            .await
            .unwrap();

        let err = store
            .insert_reserved_tickets(2, screening.id, &requests(&seats[0..3]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SeatTaken { ref seat_ids } if seat_ids == &[seats[2].id]));
        assert_eq!(store.tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_seat_in_batch() {
        let (store, screening, seats) = seeded().await;
        let mut batch = requests(&seats[0..1]);
        batch.push(batch[0]);

        let err = store
            .insert_reserved_tickets(1, screening.id, &batch)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SeatTaken { .. }));
        assert!(store.tickets().await.is_empty());
    }

    #[tokio::test]
    async fn test_unlinked_reservations_newest_first_and_bounded() {
        let (store, screening, seats) = seeded().await;
        let first = store
            .insert_reserved_tickets(1, screening.id, &requests(&seats[0..2]))
            .await
            .unwrap();

        let found = store
            .find_unlinked_reservations(1, screening.id, &[seats[0].id, seats[1].id], 1)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, first[1].id);

        let none = store
            .find_unlinked_reservations(2, screening.id, &[seats[0].id], 5)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
