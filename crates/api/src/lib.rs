//! HTTP API server with observability for the checkout service.
//!
//! Provides REST endpoints for carts, checkout, order history and stock
//! levels, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{
    CheckoutConfig, CheckoutOrchestrator, InMemoryPaymentGateway, InMemoryReconciliationLog,
    ReversalWorker,
};
use metrics_exporter_prometheus::PrometheusHandle;
use storage::CheckoutStorage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CheckoutStorage> {
    pub orchestrator: CheckoutOrchestrator<S, InMemoryPaymentGateway, InMemoryReconciliationLog>,
    pub storage: S,
    pub payment: InMemoryPaymentGateway,
    pub reconciliation: InMemoryReconciliationLog,
}

impl<S: CheckoutStorage> AppState<S> {
    /// Builds a reversal worker sharing this state's payment provider and
    /// reconciliation log.
    pub fn reversal_worker(
        &self,
    ) -> ReversalWorker<InMemoryPaymentGateway, InMemoryReconciliationLog> {
        ReversalWorker::new(
            self.payment.clone(),
            self.reconciliation.clone(),
            self.orchestrator.config().reversal_grace,
        )
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CheckoutStorage + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::create::<S>))
        .route("/carts/{customer_id}", get(routes::carts::get::<S>))
        .route("/carts/{customer_id}/lines", post(routes::carts::add_line::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/customers/{customer_id}/orders",
            get(routes::orders::list_for_customer::<S>),
        )
        .route("/inventory/{sku}", get(routes::inventory::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state around a storage backend, with
/// the in-memory payment provider and reconciliation log.
pub fn create_default_state<S: CheckoutStorage + Clone + 'static>(
    storage: S,
    config: CheckoutConfig,
) -> Arc<AppState<S>> {
    let payment = InMemoryPaymentGateway::new();
    let reconciliation = InMemoryReconciliationLog::new();
    let orchestrator = CheckoutOrchestrator::new(
        storage.clone(),
        payment.clone(),
        reconciliation.clone(),
        config,
    );

    Arc::new(AppState {
        orchestrator,
        storage,
        payment,
        reconciliation,
    })
}
