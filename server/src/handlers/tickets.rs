use axum::extract::State;
use axum::response::Response;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::services::revalidate::{BOOKING, PAYMENT, TICKETS};
use crate::services::{availability, payments, reservation};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::{Json, Path, Query};
use crate::utils::response::{created, success};
use crate::utils::CurrentUser;

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Comma-separated seat ids, e.g. `?seat_ids=4,5,6`.
    pub seat_ids: String,
}

fn parse_seat_ids(raw: &str) -> Result<Vec<i64>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| AppError::ValidationError(format!("Invalid seat id '{}'", part)))
        })
        .collect()
}

pub async fn get_availability(
    State(state): State<AppState>,
    Path(screening_id): Path<i64>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, AppError> {
    let seat_ids = parse_seat_ids(&query.seat_ids)?;
    let availability =
        availability::check_availability(state.store(), screening_id, &seat_ids).await?;
    Ok(success(availability, "Availability checked"))
}

#[derive(Debug, Deserialize)]
pub struct ReserveTicketsRequest {
    pub screening_id: i64,
    pub seat_ids: Vec<i64>,
}

pub async fn reserve_tickets(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<ReserveTicketsRequest>,
) -> Result<Response, AppError> {
    let tickets = reservation::reserve_at_base_price(
        state.store(),
        user_id,
        body.screening_id,
        &body.seat_ids,
    )
    .await?;
    state.revalidate(&[BOOKING, TICKETS]);
    Ok(created(tickets, "Seats reserved"))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Response, AppError> {
    let tickets = reservation::list_user_tickets(state.store(), user_id).await?;
    Ok(success(tickets, "Tickets retrieved"))
}

#[derive(Debug, Deserialize)]
pub struct PayTicketRequest {
    pub amount: Decimal,
    pub method: String,
}

pub async fn pay_ticket(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(ticket_id): Path<i64>,
    Json(body): Json<PayTicketRequest>,
) -> Result<Response, AppError> {
    let settlement =
        payments::pay_for_ticket(state.store(), user_id, ticket_id, body.amount, &body.method)
            .await?;
    state.revalidate(&[PAYMENT, TICKETS]);
    Ok(success(settlement, "Payment completed"))
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(ticket_id): Path<i64>,
) -> Result<Response, AppError> {
    let ticket = reservation::cancel_ticket(state.store(), user_id, ticket_id).await?;
    state.revalidate(&[TICKETS, BOOKING]);
    Ok(success(ticket, "Ticket cancelled"))
}
