//! API server entry point.

use api::config::{Config, LogFormat};
use axum::Router;
use domain::Sku;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use storage::{CheckoutStorage, InMemoryStorage, PostgresStorage};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn seed_inventory(storage: &InMemoryStorage, seed: &[(String, u32)]) {
    for (sku, quantity) in seed {
        match Sku::parse(sku.as_str()) {
            Ok(sku) => {
                tracing::info!(%sku, quantity, "seeding stock");
                storage.set_stock(sku, *quantity).await;
            }
            Err(e) => tracing::warn!(sku = %sku, error = %e, "skipping seed entry"),
        }
    }
}

/// Builds the router around a storage backend and starts the reversal sweep.
fn build_app<S: CheckoutStorage + Clone + 'static>(
    storage: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Router {
    let state = api::create_default_state(storage, config.checkout());

    let worker = state.reversal_worker();
    let every = config.reconciliation_interval;
    tokio::spawn(async move { worker.run(every).await });

    api::create_app(state, metrics_handle)
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the storage backend and build the application
    let app = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let storage = PostgresStorage::new(pool);
            storage
                .run_migrations()
                .await
                .expect("failed to run migrations");
            if !config.seed_inventory.is_empty() {
                tracing::warn!("SEED_INVENTORY is ignored with PostgreSQL storage");
            }
            tracing::info!("using PostgreSQL storage");
            build_app(storage, &config, metrics_handle)
        }
        None => {
            let storage = InMemoryStorage::new();
            seed_inventory(&storage, &config.seed_inventory).await;
            tracing::info!("using in-memory storage");
            build_app(storage, &config, metrics_handle)
        }
    };

    // 4. Start server
    let addr = config.addr();
    tracing::info!(%addr, currency = %config.currency, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
