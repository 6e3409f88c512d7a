use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, with_security_headers, Config};
use crate::handlers::{checkin, health_check, orders, tickets};
use crate::state::AppState;

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/screenings/:id/availability",
            get(tickets::get_availability),
        )
        .route(
            "/tickets",
            get(tickets::list_tickets).post(tickets::reserve_tickets),
        )
        .route("/tickets/:id/pay", post(tickets::pay_ticket))
        .route("/tickets/:id/cancel", post(tickets::cancel_ticket))
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/products", put(orders::update_order_products))
        .route("/orders/:id/pay", post(orders::pay_order))
        .route("/scan", post(checkin::scan))
        .route("/checkin/tickets/:id", post(checkin::check_in_ticket))
        .route("/checkin/orders/:id", post(checkin::check_in_order))
}

pub fn create_routes(state: AppState, config: &Config) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes());

    with_security_headers(router, config.production)
        .layer(create_cors_layer(config.cors_allowed_origins.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
