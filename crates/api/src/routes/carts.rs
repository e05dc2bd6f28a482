//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Cart, CartLine, CustomerId, DomainError, Money, Sku};
use serde::{Deserialize, Serialize};
use storage::CheckoutStorage;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct AddLineRequest {
    pub sku: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub customer_id: String,
    pub lines: Vec<CartLineResponse>,
    pub total: String,
    pub total_cents: i64,
}

#[derive(Serialize)]
pub struct CartLineResponse {
    pub sku: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    pub line_total_cents: i64,
}

impl TryFrom<&Cart> for CartResponse {
    type Error = DomainError;

    fn try_from(cart: &Cart) -> Result<Self, Self::Error> {
        let total = cart.total()?;
        let lines = cart
            .lines()
            .iter()
            .map(|line| {
                Ok(CartLineResponse {
                    sku: line.sku.to_string(),
                    name: line.name.clone(),
                    unit_price_cents: line.unit_price.cents(),
                    quantity: line.quantity,
                    line_total_cents: line.line_total()?.cents(),
                })
            })
            .collect::<Result<_, DomainError>>()?;

        Ok(Self {
            customer_id: cart.customer_id().to_string(),
            lines,
            total: total.to_string(),
            total_cents: total.cents(),
        })
    }
}

/// GET /carts/{customer_id} — the customer's cart. A customer who never
/// added anything gets an empty cart.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStorage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let customer_id = CustomerId::parse(customer_id)?;
    let cart = state
        .storage
        .get_cart(&customer_id)
        .await?
        .unwrap_or_else(|| Cart::new(customer_id));

    Ok(Json(CartResponse::try_from(&cart)?))
}

/// POST /carts/{customer_id}/lines — add a line, merging with an existing
/// line for the same SKU.
#[tracing::instrument(skip(state, req))]
pub async fn add_line<S: CheckoutStorage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<String>,
    Json(req): Json<AddLineRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let customer_id = CustomerId::parse(customer_id)?;
    let line = CartLine::new(
        Sku::parse(req.sku)?,
        req.name,
        Money::from_cents(req.unit_price_cents),
        req.quantity,
    )?;
    let cart = state.storage.add_line(&customer_id, line).await?;

    Ok(Json(CartResponse::try_from(&cart)?))
}
