pub mod checkin;
pub mod orders;
pub mod tickets;

use axum::response::Response;
use serde::Serialize;

use crate::utils::response::success;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "cinema-api",
    };

    success(payload, "Health check successful")
}
