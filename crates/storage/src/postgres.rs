use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AttemptId;
use domain::{
    Cart, CartLine, CustomerId, Money, Order, OrderDraft, OrderId, OrderLine, OrderStatus, Sku,
};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    Result, StoreError,
    store::{
        CartStore, CartWriter, CheckoutStorage, InventoryLedger, OrderStore, Reservation,
        UnitOfWork,
    },
};

const ORDER_ATTEMPT_INDEX: &str = "idx_orders_attempt";

/// PostgreSQL-backed checkout storage.
///
/// Each unit of work is one database transaction. A reservation is a
/// conditional `UPDATE` that takes the inventory row lock and keeps it
/// until the transaction ends, so concurrent reservations against the
/// same SKU queue up behind each other and re-check the committed
/// quantity once the holder finishes.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a new PostgreSQL storage.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Sets the committed quantity of a SKU, creating the row if needed.
    pub async fn set_stock(&self, sku: &Sku, quantity: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory (sku, quantity) VALUES ($1, $2)
            ON CONFLICT (sku) DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(sku.as_str())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Loads the lines of every given order with one query.
    async fn load_order_lines(&self, order_ids: &[i64]) -> Result<HashMap<i64, Vec<OrderLine>>> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT order_id, sku, name, unit_price_cents, quantity
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id ASC, position ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<i64, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let order_id: i64 = row.try_get("order_id")?;
            lines.entry(order_id).or_default().push(OrderLine {
                sku: parse_sku(row)?,
                name: row.try_get("name")?,
                unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
                quantity: to_quantity(row.try_get("quantity")?)?,
            });
        }
        Ok(lines)
    }

    /// Turns order header rows into orders, fetching their lines in bulk.
    async fn rows_to_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut lines = self.load_order_lines(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let lines = lines.remove(&id).unwrap_or_default();
                row_to_order(&row, lines)
            })
            .collect()
    }
}

fn row_to_order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
    let id: i64 = row.try_get("id")?;
    let customer_id = CustomerId::parse(row.try_get::<String, _>("customer_id")?)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let status: OrderStatus = row
        .try_get::<String, _>("status")?
        .parse()
        .map_err(|e: domain::DomainError| StoreError::Corrupt(e.to_string()))?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let draft = OrderDraft {
        customer_id,
        status,
        total: Money::from_cents(row.try_get("total_cents")?),
        lines,
    };
    Ok(Order::from_draft(OrderId::new(id), created_at, draft))
}

fn row_to_cart_line(row: &PgRow) -> Result<CartLine> {
    CartLine::new(
        parse_sku(row)?,
        row.try_get::<String, _>("name")?,
        Money::from_cents(row.try_get("unit_price_cents")?),
        to_quantity(row.try_get("quantity")?)?,
    )
    .map_err(|e| StoreError::Corrupt(e.to_string()))
}

async fn fetch_cart_lines(
    conn: &mut PgConnection,
    customer_id: &CustomerId,
) -> Result<Vec<CartLine>> {
    let rows = sqlx::query(
        r#"
        SELECT sku, name, unit_price_cents, quantity
        FROM cart_lines
        WHERE customer_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(customer_id.as_str())
    .fetch_all(conn)
    .await?;

    rows.iter().map(row_to_cart_line).collect()
}

fn duplicate_attempt(err: sqlx::Error, attempt_id: AttemptId) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.constraint() == Some(ORDER_ATTEMPT_INDEX) => {
            StoreError::DuplicateAttempt(attempt_id)
        }
        _ => StoreError::Database(err),
    }
}

fn parse_sku(row: &PgRow) -> Result<Sku> {
    Sku::parse(row.try_get::<String, _>("sku")?).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn to_quantity(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("quantity {value} out of range")))
}

#[async_trait]
impl CartStore for PostgresStorage {
    async fn get_cart(&self, customer_id: &CustomerId) -> Result<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        let exists: Option<String> =
            sqlx::query_scalar("SELECT customer_id FROM carts WHERE customer_id = $1")
                .bind(customer_id.as_str())
                .fetch_optional(&mut *conn)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let lines = fetch_cart_lines(&mut *conn, customer_id).await?;
        Ok(Some(Cart::with_lines(customer_id.clone(), lines)))
    }

    async fn add_line(&self, customer_id: &CustomerId, line: CartLine) -> Result<Cart> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO carts (customer_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(customer_id.as_str())
            .execute(&mut *tx)
            .await?;
        // Serializes concurrent adds to the same cart
        sqlx::query("SELECT customer_id FROM carts WHERE customer_id = $1 FOR UPDATE")
            .bind(customer_id.as_str())
            .execute(&mut *tx)
            .await?;

        let mut cart = Cart::with_lines(
            customer_id.clone(),
            fetch_cart_lines(&mut *tx, customer_id).await?,
        );
        let sku = line.sku.clone();
        cart.add_line(line)?;
        let merged = cart
            .lines()
            .iter()
            .find(|l| l.sku == sku)
            .ok_or_else(|| StoreError::Corrupt(format!("merged line {sku} missing")))?;

        sqlx::query(
            r#"
            INSERT INTO cart_lines (customer_id, sku, name, unit_price_cents, quantity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT ON CONSTRAINT unique_cart_sku
            DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(customer_id.as_str())
        .bind(merged.sku.as_str())
        .bind(&merged.name)
        .bind(merged.unit_price.cents())
        .bind(i64::from(merged.quantity))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(cart)
    }
}

#[async_trait]
impl CheckoutStorage for PostgresStorage {
    type Work = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork> {
        Ok(PostgresUnitOfWork {
            tx: self.pool.begin().await?,
            reserved: HashMap::new(),
        })
    }

    async fn inventory_level(&self, sku: &Sku) -> Result<Option<u32>> {
        let quantity: Option<i64> = sqlx::query_scalar("SELECT quantity FROM inventory WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(&self.pool)
            .await?;
        quantity.map(to_quantity).transpose()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, status, total_cents, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(self.rows_to_orders(rows).await?.pop())
    }

    async fn order_for_attempt(&self, attempt_id: AttemptId) -> Result<Option<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, status, total_cents, created_at
            FROM orders
            WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(self.rows_to_orders(rows).await?.pop())
    }

    async fn orders_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, status, total_cents, created_at
            FROM orders
            WHERE customer_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(customer_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.rows_to_orders(rows).await
    }
}

/// Unit of work over one PostgreSQL transaction.
///
/// Dropping it without committing rolls the transaction back.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    reserved: HashMap<Sku, u32>,
}

#[async_trait]
impl InventoryLedger for PostgresUnitOfWork {
    #[tracing::instrument(skip(self))]
    async fn try_reserve(&mut self, sku: &Sku, quantity: u32) -> Result<Reservation> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory
            SET quantity = quantity - $2, updated_at = NOW()
            WHERE sku = $1 AND quantity >= $2
            RETURNING quantity
            "#,
        )
        .bind(sku.as_str())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(remaining) = remaining {
            *self.reserved.entry(sku.clone()).or_default() += quantity;
            return Ok(Reservation::Reserved {
                remaining: to_quantity(remaining)?,
            });
        }

        let available: Option<i64> =
            sqlx::query_scalar("SELECT quantity FROM inventory WHERE sku = $1")
                .bind(sku.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(Reservation::Insufficient {
            available: available.map(to_quantity).transpose()?.unwrap_or(0),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn release(&mut self, sku: &Sku, quantity: u32) -> Result<()> {
        let reserved = self.reserved.get(sku).copied().unwrap_or(0);
        if quantity > reserved {
            return Err(StoreError::ReleaseExceedsReservation {
                sku: sku.clone(),
                requested: quantity,
                reserved,
            });
        }

        sqlx::query("UPDATE inventory SET quantity = quantity + $2 WHERE sku = $1")
            .bind(sku.as_str())
            .bind(i64::from(quantity))
            .execute(&mut *self.tx)
            .await?;
        self.reserved.insert(sku.clone(), reserved - quantity);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresUnitOfWork {
    async fn create_order(&mut self, attempt_id: AttemptId, draft: OrderDraft) -> Result<Order> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (attempt_id, customer_id, status, total_cents)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(attempt_id.as_uuid())
        .bind(draft.customer_id.as_str())
        .bind(draft.status.as_str())
        .bind(draft.total.cents())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| duplicate_attempt(e, attempt_id))?;

        let id: i64 = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        for (position, line) in draft.lines.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| StoreError::Corrupt("too many order lines".to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, position, sku, name, unit_price_cents, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind(position)
            .bind(line.sku.as_str())
            .bind(&line.name)
            .bind(line.unit_price.cents())
            .bind(i64::from(line.quantity))
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(Order::from_draft(OrderId::new(id), created_at, draft))
    }
}

#[async_trait]
impl CartWriter for PostgresUnitOfWork {
    async fn clear_lines(&mut self, customer_id: &CustomerId) -> Result<()> {
        sqlx::query("DELETE FROM cart_lines WHERE customer_id = $1")
            .bind(customer_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
