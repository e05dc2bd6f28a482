//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use checkout::CheckoutRequest;
use common::AttemptId;
use serde::{Deserialize, Serialize};
use storage::CheckoutStorage;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CheckoutBody {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub payment_token: String,
    pub idempotency_key: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub status: String,
    pub total: String,
    pub total_cents: i64,
    pub currency: String,
    pub created_utc: String,
}

/// POST /checkout — turn the customer's cart into an order.
///
/// A declined payment still answers 201 with status `Failed`.
#[tracing::instrument(skip(state, body))]
pub async fn create<S: CheckoutStorage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let mut request = CheckoutRequest::new(body.customer_id, body.payment_token);
    if let Some(key) = body.idempotency_key {
        let key = AttemptId::parse(&key)
            .map_err(|e| ApiError::BadRequest(format!("Invalid idempotency_key: {e}")))?;
        request = request.with_idempotency_key(key);
    }

    let order = state.orchestrator.checkout(request).await?;

    let response = CheckoutResponse {
        order_id: order.id().as_i64(),
        status: order.status().to_string(),
        total: order.total().to_string(),
        total_cents: order.total().cents(),
        currency: state.orchestrator.config().currency.clone(),
        created_utc: order.created_at().to_rfc3339(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}
