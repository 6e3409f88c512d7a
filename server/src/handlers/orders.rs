use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;

use crate::models::ProductLine;
use crate::services::revalidate::{BOOKING, CHECKOUT, PAYMENT, TICKETS};
use crate::services::{orders, payments};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::{Json, Path};
use crate::utils::response::{created, success};
use crate::utils::CurrentUser;

/// Any client-computed total in the body is ignored; the server prices the
/// order itself.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub screening_id: i64,
    pub seat_ids: Vec<i64>,
    #[serde(default)]
    pub products: Vec<ProductLine>,
}

pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<CreateOrderRequest>,
) -> Result<Response, AppError> {
    let order = orders::create_order(
        state.store(),
        user_id,
        body.screening_id,
        &body.seat_ids,
        &body.products,
    )
    .await?;
    state.revalidate(&[CHECKOUT, BOOKING]);
    Ok(created(order, "Order created"))
}

pub async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<i64>,
) -> Result<Response, AppError> {
    let order = orders::get_order(state.store(), user_id, order_id).await?;
    Ok(success(order, "Order retrieved"))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductsRequest {
    pub products: Vec<ProductLine>,
}

pub async fn update_order_products(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<i64>,
    Json(body): Json<UpdateProductsRequest>,
) -> Result<Response, AppError> {
    let order =
        orders::update_order_products(state.store(), user_id, order_id, &body.products).await?;
    state.revalidate(&[CHECKOUT]);
    Ok(success(order, "Order products updated"))
}

#[derive(Debug, Deserialize)]
pub struct PayOrderRequest {
    pub method: String,
}

pub async fn pay_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<i64>,
    Json(body): Json<PayOrderRequest>,
) -> Result<Response, AppError> {
    let settlement = payments::pay_for_order(state.store(), user_id, order_id, &body.method).await?;
    state.revalidate(&[PAYMENT, TICKETS, CHECKOUT]);
    Ok(success(settlement, "Payment completed"))
}
