//! Stock level endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::Sku;
use serde::Serialize;
use storage::CheckoutStorage;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct InventoryResponse {
    pub sku: String,
    pub quantity: u32,
}

/// GET /inventory/{sku} — committed stock for a SKU.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStorage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku): Path<String>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let sku = Sku::parse(sku)?;
    let quantity = state
        .storage
        .inventory_level(&sku)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("SKU {sku} not found")))?;

    Ok(Json(InventoryResponse {
        sku: sku.to_string(),
        quantity,
    }))
}
