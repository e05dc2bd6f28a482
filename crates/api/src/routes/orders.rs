//! Order read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{CustomerId, DomainError, Order, OrderId, OrderLine};
use serde::Serialize;
use storage::CheckoutStorage;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub customer_id: String,
    pub status: String,
    pub total: String,
    pub total_cents: i64,
    pub created_utc: String,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub sku: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    pub line_total_cents: i64,
}

impl TryFrom<&OrderLine> for OrderLineResponse {
    type Error = DomainError;

    fn try_from(line: &OrderLine) -> Result<Self, Self::Error> {
        Ok(Self {
            sku: line.sku.to_string(),
            name: line.name.clone(),
            unit_price_cents: line.unit_price.cents(),
            quantity: line.quantity,
            line_total_cents: line.line_total()?.cents(),
        })
    }
}

impl TryFrom<&Order> for OrderResponse {
    type Error = DomainError;

    fn try_from(order: &Order) -> Result<Self, Self::Error> {
        Ok(Self {
            id: order.id().as_i64(),
            customer_id: order.customer_id().to_string(),
            status: order.status().to_string(),
            total: order.total().to_string(),
            total_cents: order.total().cents(),
            created_utc: order.created_at().to_rfc3339(),
            lines: order
                .lines()
                .iter()
                .map(OrderLineResponse::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// GET /orders/{id} — load a committed order.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStorage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .storage
        .get_order(OrderId::new(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::try_from(&order)?))
}

/// GET /customers/{customer_id}/orders — a customer's order history,
/// newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_customer<S: CheckoutStorage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let customer_id = CustomerId::parse(customer_id)?;
    let orders = state.storage.orders_for_customer(&customer_id).await?;

    let orders = orders
        .iter()
        .map(OrderResponse::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(orders))
}
