//! Staff check-in endpoints.

use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use tracing::info;

use crate::services::checkin;
use crate::services::revalidate::TICKETS;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::{Json, Path};
use crate::utils::response::success;
use crate::utils::StaffUser;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub code: String,
}

pub async fn scan(
    State(state): State<AppState>,
    StaffUser(staff_id): StaffUser,
    Json(body): Json<ScanRequest>,
) -> Result<Response, AppError> {
    let target = checkin::resolve_scan_code(state.store(), &body.code).await?;
    info!(staff_id, "Scan code resolved");
    Ok(success(target, "Code resolved"))
}

pub async fn check_in_ticket(
    State(state): State<AppState>,
    StaffUser(staff_id): StaffUser,
    Path(ticket_id): Path<i64>,
) -> Result<Response, AppError> {
    let result = checkin::mark_ticket_used(state.store(), ticket_id).await?;
    info!(staff_id, ticket_id, already_used = result.already_used, "Ticket check-in");
    state.revalidate(&[TICKETS]);
    Ok(success(result, "Ticket checked in"))
}

pub async fn check_in_order(
    State(state): State<AppState>,
    StaffUser(staff_id): StaffUser,
    Path(order_id): Path<i64>,
) -> Result<Response, AppError> {
    let summary = checkin::mark_all_tickets_in_order_used(state.store(), order_id).await?;
    info!(staff_id, order_id, "Order check-in");
    state.revalidate(&[TICKETS]);
    Ok(success(summary, "Order checked in"))
}
