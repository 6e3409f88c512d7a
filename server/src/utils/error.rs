use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::TicketStatus;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Seats already taken: {seat_ids:?}")]
    SeatConflict { seat_ids: Vec<i64> },

    #[error("Already paid: {0}")]
    AlreadyPaid(String),

    #[error("Payment already exists: {0}")]
    PaymentExists(String),

    #[error("Illegal ticket status transition from {from} to {to}")]
    InvalidTransition { from: TicketStatus, to: TicketStatus },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence error")]
    PersistenceError(StoreError),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SeatTaken { seat_ids } => AppError::SeatConflict { seat_ids },
            StoreError::DuplicatePayment { ticket_id } => {
                AppError::PaymentExists(format!("Ticket {} already has a payment", ticket_id))
            }
            StoreError::StaleStatus { ticket_id } => AppError::Conflict(format!(
                "Ticket {} was modified concurrently, please retry",
                ticket_id
            )),
            other => AppError::PersistenceError(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SeatConflict { .. }
            | AppError::AlreadyPaid(_)
            | AppError::PaymentExists(_)
            | AppError::InvalidTransition { .. }
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::SeatConflict { .. } => "SEAT_CONFLICT",
            AppError::AlreadyPaid(_) => "ALREADY_PAID",
            AppError::PaymentExists(_) => "PAYMENT_EXISTS",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::Conflict(_) => "CONFLICT",
            AppError::PersistenceError(_) => "PERSISTENCE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::PersistenceError(e) => {
                error!(error = ?e, "Persistence error");
            }
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            _ => {
                warn!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Storage and internal details never reach the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::AlreadyPaid(msg)
            | AppError::PaymentExists(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::SeatConflict { .. } => "One or more seats are already taken".to_string(),
            AppError::InvalidTransition { .. } => self.to_string(),
            AppError::PersistenceError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        };

        let details = match &self {
            AppError::SeatConflict { seat_ids } => Some(json!({ "conflicting": seat_ids })),
            _ => None,
        };

        error_response(code, public_message, details, status)
    }
}
