//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p storage --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::AttemptId;
use domain::{Cart, CartLine, CustomerId, Money, OrderDraft, OrderStatus, Sku};
use sqlx::PgPool;
use storage::{
    CartStore, CartWriter, CheckoutStorage, InventoryLedger, OrderStore, PostgresStorage,
    Reservation, StoreError, UnitOfWork,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            for migration in [
                include_str!("../../../migrations/001_create_checkout_tables.sql"),
                include_str!("../../../migrations/002_order_attempts_and_quantity_bounds.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh storage with its own pool and cleared tables
async fn get_test_storage() -> PostgresStorage {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_lines, orders, cart_lines, carts, inventory")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStorage::new(pool)
}

fn sku(s: &str) -> Sku {
    Sku::parse(s).unwrap()
}

fn alice() -> CustomerId {
    CustomerId::parse("alice").unwrap()
}

fn draft(cart: &Cart, status: OrderStatus) -> OrderDraft {
    OrderDraft::from_cart(cart, status, cart.total().unwrap())
}

async fn seed_cart(storage: &PostgresStorage) -> Cart {
    storage.set_stock(&sku("SKU-1"), 5).await.unwrap();
    storage.set_stock(&sku("SKU-2"), 5).await.unwrap();
    storage
        .add_line(
            &alice(),
            CartLine::new(sku("SKU-1"), "Widget", Money::from_cents(1000), 2).unwrap(),
        )
        .await
        .unwrap();
    storage
        .add_line(
            &alice(),
            CartLine::new(sku("SKU-2"), "Gadget", Money::from_cents(500), 1).unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn cart_lines_keep_insertion_order_and_merge() {
    let storage = get_test_storage().await;
    seed_cart(&storage).await;

    let cart = storage
        .add_line(
            &alice(),
            CartLine::new(sku("SKU-1"), "Widget", Money::from_cents(1500), 1).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(cart.lines().len(), 2);
    assert_eq!(cart.lines()[0].sku.as_str(), "SKU-1");
    assert_eq!(cart.lines()[0].quantity, 3);
    assert_eq!(cart.lines()[0].unit_price, Money::from_cents(1000));
    assert_eq!(cart.total(), Ok(Money::from_cents(3500)));
}

#[tokio::test]
async fn missing_cart_is_none() {
    let storage = get_test_storage().await;
    assert!(storage.get_cart(&alice()).await.unwrap().is_none());
}

#[tokio::test]
async fn commit_applies_reservations_order_and_cart_clear_together() {
    let storage = get_test_storage().await;
    let cart = seed_cart(&storage).await;

    let mut work = storage.begin().await.unwrap();
    assert_eq!(
        work.try_reserve(&sku("SKU-1"), 2).await.unwrap(),
        Reservation::Reserved { remaining: 3 }
    );
    work.try_reserve(&sku("SKU-2"), 1).await.unwrap();
    let order = work
        .create_order(AttemptId::new(), draft(&cart, OrderStatus::Paid))
        .await
        .unwrap();
    work.clear_lines(&alice()).await.unwrap();

    // Nothing visible outside the transaction yet
    assert_eq!(storage.inventory_level(&sku("SKU-1")).await.unwrap(), Some(5));
    assert!(storage.get_order(order.id()).await.unwrap().is_none());

    work.commit().await.unwrap();

    assert_eq!(storage.inventory_level(&sku("SKU-1")).await.unwrap(), Some(3));
    assert_eq!(storage.inventory_level(&sku("SKU-2")).await.unwrap(), Some(4));
    let stored = storage.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Paid);
    assert_eq!(stored.total(), Money::from_cents(2500));
    assert_eq!(stored.lines().len(), 2);
    assert!(storage.get_cart(&alice()).await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn rollback_discards_everything() {
    let storage = get_test_storage().await;
    let cart = seed_cart(&storage).await;

    let mut work = storage.begin().await.unwrap();
    work.try_reserve(&sku("SKU-1"), 2).await.unwrap();
    work.create_order(AttemptId::new(), draft(&cart, OrderStatus::Paid))
        .await
        .unwrap();
    work.clear_lines(&alice()).await.unwrap();
    work.rollback().await.unwrap();

    assert_eq!(storage.inventory_level(&sku("SKU-1")).await.unwrap(), Some(5));
    assert!(storage.orders_for_customer(&alice()).await.unwrap().is_empty());
    assert_eq!(storage.get_cart(&alice()).await.unwrap().unwrap().lines().len(), 2);
}

#[tokio::test]
async fn insufficient_stock_reports_available() {
    let storage = get_test_storage().await;
    seed_cart(&storage).await;

    let mut work = storage.begin().await.unwrap();
    assert_eq!(
        work.try_reserve(&sku("SKU-1"), 6).await.unwrap(),
        Reservation::Insufficient { available: 5 }
    );
    assert_eq!(
        work.try_reserve(&sku("UNKNOWN"), 1).await.unwrap(),
        Reservation::Insufficient { available: 0 }
    );
}

#[tokio::test]
async fn release_rejects_more_than_reserved() {
    let storage = get_test_storage().await;
    seed_cart(&storage).await;

    let mut work = storage.begin().await.unwrap();
    work.try_reserve(&sku("SKU-1"), 2).await.unwrap();
    work.release(&sku("SKU-1"), 2).await.unwrap();

    let err = work.release(&sku("SKU-1"), 1).await.unwrap_err();
    assert!(matches!(err, StoreError::ReleaseExceedsReservation { .. }));
}

#[tokio::test]
async fn concurrent_reservations_on_one_row_never_oversell() {
    let storage = get_test_storage().await;
    seed_cart(&storage).await;

    let mut first = storage.begin().await.unwrap();
    assert!(first.try_reserve(&sku("SKU-1"), 5).await.unwrap().is_reserved());

    let contender = {
        let storage = storage.clone();
        tokio::spawn(async move {
            let mut second = storage.begin().await.unwrap();
            second.try_reserve(&sku("SKU-1"), 5).await.unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!contender.is_finished());

    first.commit().await.unwrap();
    assert_eq!(
        contender.await.unwrap(),
        Reservation::Insufficient { available: 0 }
    );
    assert_eq!(storage.inventory_level(&sku("SKU-1")).await.unwrap(), Some(0));
}

#[tokio::test]
async fn order_history_is_newest_first() {
    let storage = get_test_storage().await;
    let cart = seed_cart(&storage).await;

    for status in [OrderStatus::Failed, OrderStatus::Paid] {
        let mut work = storage.begin().await.unwrap();
        work.create_order(AttemptId::new(), draft(&cart, status))
            .await
            .unwrap();
        work.commit().await.unwrap();
    }

    let history = storage.orders_for_customer(&alice()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status(), OrderStatus::Paid);
    assert!(history[0].id() > history[1].id());
    assert!(history.iter().all(|order| order.lines().len() == 2));
    assert_eq!(history[1].lines()[0].sku.as_str(), "SKU-1");
}

#[tokio::test]
async fn second_order_for_an_attempt_is_rejected() {
    let storage = get_test_storage().await;
    let cart = seed_cart(&storage).await;
    let attempt_id = AttemptId::new();

    let mut first = storage.begin().await.unwrap();
    let order = first.create_order(attempt_id, draft(&cart, OrderStatus::Paid)).await.unwrap();
    first.commit().await.unwrap();

    let mut second = storage.begin().await.unwrap();
    let err = second.create_order(attempt_id, draft(&cart, OrderStatus::Paid)).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateAttempt(id) if id == attempt_id));

    assert_eq!(
        storage.order_for_attempt(attempt_id).await.unwrap().map(|o| o.id()),
        Some(order.id())
    );
    assert!(storage.order_for_attempt(AttemptId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn add_line_overflow_is_rejected_and_keeps_cart() {
    let storage = get_test_storage().await;
    seed_cart(&storage).await;

    let err = storage
        .add_line(
            &alice(),
            CartLine::new(sku("SKU-1"), "Widget", Money::from_cents(1), u32::MAX).unwrap(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Invalid(_)));
    let cart = storage.get_cart(&alice()).await.unwrap().unwrap();
    assert_eq!(cart.lines()[0].quantity, 2);
}
