use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::models::{NewOrder, NewOrderItem, OrderDetails, Product, ProductLine, SeatRequest, Ticket};
use crate::services::reservation::reserve_tickets;
use crate::store::{unique_ids, Store};
use crate::utils::error::AppError;

/// Prices product lines against the active catalog.
///
/// Lines whose product is unknown or inactive contribute nothing and produce
/// no order item. `seat_tickets` maps seat ids to the tickets of the order so
/// seat-scoped lines can be attached to their ticket.
pub fn price_lines(
    lines: &[ProductLine],
    active: &[Product],
    seat_tickets: &HashMap<i64, i64>,
) -> Vec<NewOrderItem> {
    let prices: HashMap<i64, Decimal> = active
        .iter()
        .filter(|p| p.is_active)
        .map(|p| (p.id, p.price))
        .collect();

    lines
        .iter()
        .filter_map(|line| match prices.get(&line.product_id) {
            Some(price) => Some(NewOrderItem {
                product_id: line.product_id,
                ticket_id: line.seat_id.and_then(|seat| seat_tickets.get(&seat).copied()),
                quantity: line.quantity,
                price: *price,
            }),
            None => {
                warn!(
                    product_id = line.product_id,
                    "Product unknown or inactive, priced at zero"
                );
                None
            }
        })
        .collect()
}

/// Ticket prices plus every line's `price * quantity`, recomputed from scratch.
pub fn order_total<'a>(
    tickets: impl IntoIterator<Item = &'a Ticket>,
    items: &[NewOrderItem],
) -> Decimal {
    let tickets: Decimal = tickets.into_iter().map(|t| t.price).sum();
    let products: Decimal = items.iter().map(NewOrderItem::line_total).sum();
    tickets + products
}

/// Upper bound on a single product line.
pub const MAX_LINE_QUANTITY: i32 = 100;

/// Largest amount a `NUMERIC(12, 2)` money column holds.
fn max_storable_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

fn ensure_storable(total: Decimal) -> Result<(), AppError> {
    if total > max_storable_amount() {
        return Err(AppError::ValidationError(format!(
            "Order total {} exceeds the maximum of {}",
            total,
            max_storable_amount()
        )));
    }
    Ok(())
}

fn validate_lines(lines: &[ProductLine], seat_ids: &[i64]) -> Result<(), AppError> {
    for line in lines {
        if !(1..=MAX_LINE_QUANTITY).contains(&line.quantity) {
            return Err(AppError::ValidationError(format!(
                "Quantity for product {} must be between 1 and {}",
                line.product_id, MAX_LINE_QUANTITY
            )));
        }
        if let Some(seat_id) = line.seat_id {
            if !seat_ids.contains(&seat_id) {
                return Err(AppError::ValidationError(format!(
                    "Product {} is attached to seat {} which is not part of the order",
                    line.product_id, seat_id
                )));
            }
        }
    }
    Ok(())
}

async fn load_active_products(
    store: &dyn Store,
    lines: &[ProductLine],
) -> Result<Vec<Product>, AppError> {
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    let ids = unique_ids(&lines.iter().map(|l| l.product_id).collect::<Vec<_>>());
    Ok(store.find_active_products(&ids).await?)
}

async fn load_details(store: &dyn Store, order_id: i64) -> Result<OrderDetails, AppError> {
    store
        .find_order_details(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))
}

/// Reserves `seat_ids` at the screening's base price and bundles the tickets
/// with the requested products into a new order.
///
/// If the reservation fails nothing is written. If the order insert fails
/// after the reservation, the tickets stay `reserved` and unlinked; they can
/// be found again with
/// [`find_unlinked_reservations`](crate::services::reservation::find_unlinked_reservations).
pub async fn create_order(
    store: &dyn Store,
    user_id: i64,
    screening_id: i64,
    seat_ids: &[i64],
    products: &[ProductLine],
) -> Result<OrderDetails, AppError> {
    if user_id <= 0 || screening_id <= 0 {
        return Err(AppError::ValidationError(
            "userId and screeningId are required".to_string(),
        ));
    }
    if seat_ids.is_empty() {
        return Err(AppError::ValidationError(
            "At least one seat must be selected".to_string(),
        ));
    }
    validate_lines(products, seat_ids)?;

    let screening = store
        .find_screening(screening_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Screening {} not found", screening_id)))?;
    let active = load_active_products(store, products).await?;
    let projected_lines: Decimal = products
        .iter()
        .filter_map(|line| {
            active
                .iter()
                .find(|p| p.id == line.product_id)
                .map(|p| p.price * Decimal::from(line.quantity))
        })
        .sum();
    let projected = screening.base_price * Decimal::from(seat_ids.len()) + projected_lines;
    ensure_storable(projected)?;

    let seats: Vec<SeatRequest> = seat_ids
        .iter()
        .map(|seat_id| SeatRequest {
            seat_id: *seat_id,
            price: screening.base_price,
        })
        .collect();
    let tickets = reserve_tickets(store, user_id, screening_id, &seats).await?;

    let seat_tickets: HashMap<i64, i64> = tickets.iter().map(|t| (t.seat_id, t.id)).collect();
    let items = price_lines(products, &active, &seat_tickets);
    let total_amount = order_total(&tickets, &items);
    let ticket_ids: Vec<i64> = tickets.iter().map(|t| t.id).collect();

    let order = store
        .create_order(NewOrder {
            user_id,
            total_amount,
            items,
            ticket_ids: ticket_ids.clone(),
        })
        .await
        .map_err(|e| {
            error!(
                user_id,
                screening_id,
                ticket_ids = ?ticket_ids,
                error = %e,
                "Order creation failed, reserved tickets left unlinked"
            );
            AppError::from(e)
        })?;

    info!(
        user_id,
        order_id = order.id,
        %total_amount,
        tickets = ticket_ids.len(),
        "Order created"
    );
    load_details(store, order.id).await
}

/// Replaces all product lines of an order and recomputes its total from the
/// order's tickets and the new lines. Refused once any ticket is paid.
pub async fn update_order_products(
    store: &dyn Store,
    user_id: i64,
    order_id: i64,
    products: &[ProductLine],
) -> Result<OrderDetails, AppError> {
    let order = store
        .find_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;
    if order.user_id != user_id {
        warn!(user_id, order_id, "Order update by non-owner refused");
        return Err(AppError::Forbidden("This order does not belong to you".to_string()));
    }

    let tickets = store.order_tickets(order_id).await?;
    if tickets.iter().any(|t| t.status.is_settled()) {
        return Err(AppError::AlreadyPaid(format!(
            "Order {} has paid tickets, its products can no longer change",
            order_id
        )));
    }
    let tickets: Vec<Ticket> = tickets
        .into_iter()
        .filter(|t| t.status.holds_seat())
        .collect();
    let seat_ids: Vec<i64> = tickets.iter().map(|t| t.seat_id).collect();
    validate_lines(products, &seat_ids)?;

    let active = load_active_products(store, products).await?;
    let seat_tickets: HashMap<i64, i64> = tickets.iter().map(|t| (t.seat_id, t.id)).collect();
    let items = price_lines(products, &active, &seat_tickets);
    let total_amount = order_total(&tickets, &items);
    ensure_storable(total_amount)?;

    store
        .replace_order_items(order_id, &items, total_amount)
        .await?;

    info!(user_id, order_id, %total_amount, lines = items.len(), "Order products replaced");
    load_details(store, order_id).await
}

pub async fn get_order(
    store: &dyn Store,
    user_id: i64,
    order_id: i64,
) -> Result<OrderDetails, AppError> {
    let details = load_details(store, order_id).await?;
    if details.order.user_id != user_id {
        return Err(AppError::Forbidden("This order does not belong to you".to_string()));
    }
    Ok(details)
}
