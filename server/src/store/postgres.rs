//! Postgres-backed store.
//!
//! Seat exclusivity is enforced by the partial unique index
//! `tickets_active_seat_key` on `(screening_id, seat_id)` for active statuses;
//! the availability read inside the reservation transaction only produces a
//! friendlier error before the index would reject the insert.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{FromRow, Postgres, QueryBuilder};

use super::{unique_ids, Store, StoreError, StoreResult, TicketRelations};
use crate::models::order::ORDER_STATUS_PENDING;
use crate::models::payment::PAYMENT_STATUS_COMPLETED;
use crate::models::{
    Hall, Movie, NewOrder, NewOrderItem, NewPayment, Order, OrderDetails, OrderItem,
    OrderItemDetails, Payment, Product, Screening, Seat, SeatRequest, Ticket, TicketDetails,
    TicketStatus,
};
use crate::services::ticket_status::StatusChange;

const ACTIVE_SEAT_CONSTRAINT: &str = "tickets_active_seat_key";
const PAYMENT_TICKET_CONSTRAINT: &str = "payments_ticket_id_key";

macro_rules! ticket_columns {
    () => {
        "id, user_id, screening_id, seat_id, order_id, price, status, qr_code, created_at, updated_at"
    };
}

macro_rules! select_tickets {
    ($tail:literal) => {
        concat!("SELECT ", ticket_columns!(), " FROM tickets ", $tail)
    };
}

const ORDER_COLUMNS: &str = "id, user_id, total_amount, status, created_at, updated_at";

#[derive(Debug, FromRow)]
struct TicketRow {
    id: i64,
    user_id: i64,
    screening_id: i64,
    seat_id: i64,
    order_id: Option<i64>,
    price: Decimal,
    status: String,
    qr_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TicketStatus>()
            .map_err(|e| StoreError::Decode(format!("ticket {}: {}", row.id, e)))?;
        Ok(Ticket {
            id: row.id,
            user_id: row.user_id,
            screening_id: row.screening_id,
            seat_id: row.seat_id,
            order_id: row.order_id,
            price: row.price,
            status,
            qr_code: row.qr_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_tickets(rows: Vec<TicketRow>) -> StoreResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn active_statuses() -> Vec<&'static str> {
    TicketStatus::ACTIVE.iter().map(TicketStatus::as_str).collect()
}

async fn insert_items(
    conn: &mut PgConnection,
    order_id: i64,
    items: &[NewOrderItem],
) -> Result<(), sqlx::Error> {
    if items.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO order_items (order_id, product_id, ticket_id, quantity, price) ");
    builder.push_values(items, |mut b, item| {
        b.push_bind(order_id)
            .push_bind(item.product_id)
            .push_bind(item.ticket_id)
            .push_bind(item.quantity)
            .push_bind(item.price);
    });
    builder.build().execute(conn).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn held_seats(&self, screening_id: i64, seat_ids: &[i64]) -> StoreResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT seat_id FROM tickets
             WHERE screening_id = $1 AND seat_id = ANY($2) AND status = ANY($3)
             ORDER BY seat_id",
        )
        .bind(screening_id)
        .bind(seat_ids)
        .bind(active_statuses())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn load_relations(&self, tickets: &[Ticket]) -> StoreResult<TicketRelations> {
        let screening_ids = unique_ids(&tickets.iter().map(|t| t.screening_id).collect::<Vec<_>>());
        let seat_ids = unique_ids(&tickets.iter().map(|t| t.seat_id).collect::<Vec<_>>());
        let ticket_ids: Vec<i64> = tickets.iter().map(|t| t.id).collect();

        let screenings: Vec<Screening> = sqlx::query_as(
            "SELECT id, movie_id, hall_id, start_time, end_time, base_price, created_at, updated_at
             FROM screenings WHERE id = ANY($1)",
        )
        .bind(&screening_ids)
        .fetch_all(&self.pool)
        .await?;

        let movie_ids = unique_ids(&screenings.iter().map(|s| s.movie_id).collect::<Vec<_>>());
        let hall_ids = unique_ids(&screenings.iter().map(|s| s.hall_id).collect::<Vec<_>>());

        let movies: Vec<Movie> = sqlx::query_as(
            "SELECT id, title, description, duration_minutes, created_at, updated_at
             FROM movies WHERE id = ANY($1)",
        )
        .bind(&movie_ids)
        .fetch_all(&self.pool)
        .await?;

        let halls: Vec<Hall> = sqlx::query_as(
            "SELECT id, name, created_at, updated_at FROM halls WHERE id = ANY($1)",
        )
        .bind(&hall_ids)
        .fetch_all(&self.pool)
        .await?;

        let seats: Vec<Seat> = sqlx::query_as(
            "SELECT id, hall_id, seat_row, number, seat_type FROM seats WHERE id = ANY($1)",
        )
        .bind(&seat_ids)
        .fetch_all(&self.pool)
        .await?;

        let payments = self.find_payments(&ticket_ids).await?;

        Ok(TicketRelations {
            screenings: screenings.into_iter().map(|s| (s.id, s)).collect(),
            movies: movies.into_iter().map(|m| (m.id, m)).collect(),
            halls: halls.into_iter().map(|h| (h.id, h)).collect(),
            seats: seats.into_iter().map(|s| (s.id, s)).collect(),
            payments: payments.into_iter().map(|p| (p.ticket_id, p)).collect(),
        })
    }

    async fn with_details(&self, tickets: Vec<Ticket>) -> StoreResult<Vec<TicketDetails>> {
        if tickets.is_empty() {
            return Ok(Vec::new());
        }
        let relations = self.load_relations(&tickets).await?;
        relations.assemble(tickets)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_screening(&self, screening_id: i64) -> StoreResult<Option<Screening>> {
        let screening = sqlx::query_as(
            "SELECT id, movie_id, hall_id, start_time, end_time, base_price, created_at, updated_at
             FROM screenings WHERE id = $1",
        )
        .bind(screening_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(screening)
    }

    async fn find_seats(&self, seat_ids: &[i64]) -> StoreResult<Vec<Seat>> {
        let seats = sqlx::query_as(
            "SELECT id, hall_id, seat_row, number, seat_type FROM seats WHERE id = ANY($1)",
        )
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn find_active_products(&self, product_ids: &[i64]) -> StoreResult<Vec<Product>> {
        let products = sqlx::query_as(
            "SELECT id, name, category, price, is_active, created_at, updated_at
             FROM products WHERE id = ANY($1) AND is_active",
        )
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn find_active_tickets(
        &self,
        screening_id: i64,
        seat_ids: &[i64],
    ) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(select_tickets!(
            "WHERE screening_id = $1 AND seat_id = ANY($2) AND status = ANY($3)"
        ))
        .bind(screening_id)
        .bind(seat_ids)
        .bind(active_statuses())
        .fetch_all(&self.pool)
        .await?;
        into_tickets(rows)
    }

    async fn insert_reserved_tickets(
        &self,
        user_id: i64,
        screening_id: i64,
        seats: &[SeatRequest],
    ) -> StoreResult<Vec<Ticket>> {
        let seat_ids: Vec<i64> = seats.iter().map(|s| s.seat_id).collect();
        let mut tx = self.pool.begin().await?;

        let held: Vec<(i64,)> = sqlx::query_as(
            "SELECT seat_id FROM tickets
             WHERE screening_id = $1 AND seat_id = ANY($2) AND status = ANY($3)",
        )
        .bind(screening_id)
        .bind(&seat_ids)
        .bind(active_statuses())
        .fetch_all(&mut *tx)
        .await?;
        if !held.is_empty() {
            let mut taken: Vec<i64> = held.into_iter().map(|(id,)| id).collect();
            taken.sort_unstable();
            taken.dedup();
            return Err(StoreError::SeatTaken { seat_ids: taken });
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO tickets (user_id, screening_id, seat_id, price, status) ",
        );
        builder.push_values(seats, |mut b, seat| {
            b.push_bind(user_id)
                .push_bind(screening_id)
                .push_bind(seat.seat_id)
                .push_bind(seat.price)
                .push_bind(TicketStatus::Reserved.as_str());
        });
        builder.push(concat!(" RETURNING ", ticket_columns!()));

        let inserted = builder
            .build_query_as::<TicketRow>()
            .fetch_all(&mut *tx)
            .await;

        let rows = match inserted {
            Ok(rows) => rows,
            Err(e) if violates(&e, ACTIVE_SEAT_CONSTRAINT) => {
                drop(tx);
                // Lost the race to a concurrent booking; report whoever holds the seats now.
                let mut taken = self.held_seats(screening_id, &seat_ids).await?;
                if taken.is_empty() {
                    taken = unique_ids(&seat_ids);
                }
                return Err(StoreError::SeatTaken { seat_ids: taken });
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        into_tickets(rows)
    }

    async fn find_unlinked_reservations(
        &self,
        user_id: i64,
        screening_id: i64,
        seat_ids: &[i64],
        limit: usize,
    ) -> StoreResult<Vec<Ticket>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<TicketRow> = sqlx::query_as(select_tickets!(
            "WHERE user_id = $1 AND screening_id = $2 AND seat_id = ANY($3)
               AND status = $4 AND order_id IS NULL
             ORDER BY created_at DESC, id DESC
             LIMIT $5"
        ))
        .bind(user_id)
        .bind(screening_id)
        .bind(seat_ids)
        .bind(TicketStatus::Reserved.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_tickets(rows)
    }

    async fn find_ticket(&self, ticket_id: i64) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(select_tickets!("WHERE id = $1"))
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn find_ticket_details(&self, ticket_id: i64) -> StoreResult<Option<TicketDetails>> {
        match self.find_ticket(ticket_id).await? {
            Some(ticket) => Ok(self.with_details(vec![ticket]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_user_tickets(&self, user_id: i64) -> StoreResult<Vec<TicketDetails>> {
        let rows: Vec<TicketRow> = sqlx::query_as(select_tickets!(
            "WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.with_details(into_tickets(rows)?).await
    }

    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;

        let created: Order = sqlx::query_as(&format!(
            "INSERT INTO orders (user_id, total_amount, status) VALUES ($1, $2, $3)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.user_id)
        .bind(order.total_amount)
        .bind(ORDER_STATUS_PENDING)
        .fetch_one(&mut *tx)
        .await?;

        insert_items(&mut tx, created.id, &order.items).await?;

        let linked = sqlx::query(
            "UPDATE tickets SET order_id = $1, updated_at = NOW() WHERE id = ANY($2)",
        )
        .bind(created.id)
        .bind(&order.ticket_ids)
        .execute(&mut *tx)
        .await?;
        if linked.rows_affected() != order.ticket_ids.len() as u64 {
            return Err(StoreError::MissingRelation(format!(
                "expected {} tickets to link, found {}",
                order.ticket_ids.len(),
                linked.rows_affected()
            )));
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn find_order(&self, order_id: i64) -> StoreResult<Option<Order>> {
        let order = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn find_order_details(&self, order_id: i64) -> StoreResult<Option<OrderDetails>> {
        let Some(order) = self.find_order(order_id).await? else {
            return Ok(None);
        };

        let tickets = self.order_tickets(order_id).await?;
        let tickets = self.with_details(tickets).await?;

        let items: Vec<OrderItem> = sqlx::query_as(
            "SELECT id, order_id, product_id, ticket_id, quantity, price
             FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        // Historical lines keep their product even if it was deactivated since.
        let product_ids = unique_ids(&items.iter().map(|i| i.product_id).collect::<Vec<_>>());
        let products: Vec<Product> = sqlx::query_as(
            "SELECT id, name, category, price, is_active, created_at, updated_at
             FROM products WHERE id = ANY($1)",
        )
        .bind(&product_ids)
        .fetch_all(&self.pool)
        .await?;
        let products: HashMap<i64, Product> = products.into_iter().map(|p| (p.id, p)).collect();

        let items = items
            .into_iter()
            .map(|item| {
                let product = products.get(&item.product_id).cloned().ok_or_else(|| {
                    StoreError::MissingRelation(format!("product {}", item.product_id))
                })?;
                Ok(OrderItemDetails { item, product })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(OrderDetails {
            order,
            tickets,
            items,
        }))
    }

    async fn order_tickets(&self, order_id: i64) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> =
            sqlx::query_as(select_tickets!("WHERE order_id = $1 ORDER BY id"))
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;
        into_tickets(rows)
    }

    async fn replace_order_items(
        &self,
        order_id: i64,
        items: &[NewOrderItem],
        total_amount: Decimal,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE orders SET total_amount = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(order_id)
        .bind(total_amount)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::MissingRelation(format!("order {}", order_id)));
        }

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        insert_items(&mut tx, order_id, items).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_payments(&self, ticket_ids: &[i64]) -> StoreResult<Vec<Payment>> {
        let payments = sqlx::query_as(
            "SELECT id, ticket_id, amount, method, status, transaction_id, created_at
             FROM payments WHERE ticket_id = ANY($1)",
        )
        .bind(ticket_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn settle_ticket(
        &self,
        change: &StatusChange,
        payment: &NewPayment,
        qr_code: &str,
    ) -> StoreResult<Payment> {
        let ticket_id = change.ticket_id();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments (ticket_id, amount, method, status, transaction_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, ticket_id, amount, method, status, transaction_id, created_at",
        )
        .bind(ticket_id)
        .bind(payment.amount)
        .bind(&payment.method)
        .bind(PAYMENT_STATUS_COMPLETED)
        .bind(&payment.transaction_id)
        .fetch_one(&mut *tx)
        .await;

        let recorded = match inserted {
            Ok(recorded) => recorded,
            Err(e) if violates(&e, PAYMENT_TICKET_CONSTRAINT) => {
                return Err(StoreError::DuplicatePayment { ticket_id });
            }
            Err(e) => return Err(e.into()),
        };

        let updated = sqlx::query(
            "UPDATE tickets SET status = $3, qr_code = $4, updated_at = NOW()
             WHERE id = $1 AND status = $2",
        )
        .bind(ticket_id)
        .bind(change.from().as_str())
        .bind(change.to().as_str())
        .bind(qr_code)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::StaleStatus { ticket_id });
        }

        tx.commit().await?;
        Ok(recorded)
    }

    async fn update_ticket_status(&self, change: &StatusChange) -> StoreResult<Ticket> {
        let ticket_id = change.ticket_id();
        let row: Option<TicketRow> = sqlx::query_as(concat!(
            "UPDATE tickets SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING ",
            ticket_columns!()
        ))
        .bind(ticket_id)
        .bind(change.from().as_str())
        .bind(change.to().as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ticket::try_from(row),
            None if self.find_ticket(ticket_id).await?.is_some() => {
                Err(StoreError::StaleStatus { ticket_id })
            }
            None => Err(StoreError::MissingRelation(format!("ticket {}", ticket_id))),
        }
    }
}
