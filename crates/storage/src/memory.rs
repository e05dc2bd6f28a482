use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::AttemptId;
use domain::{Cart, CartLine, CustomerId, InventoryItem, Order, OrderDraft, OrderId, Sku};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{
        CartStore, CartWriter, CheckoutStorage, InventoryLedger, OrderStore, Reservation,
        UnitOfWork,
    },
};

#[derive(Debug, Default)]
struct Tables {
    carts: HashMap<CustomerId, Cart>,
    inventory: HashMap<Sku, InventoryItem>,
    orders: BTreeMap<OrderId, Order>,
    attempts: HashMap<AttemptId, OrderId>,
}

/// In-memory storage for tests and single-process deployments.
///
/// Committed data sits behind one `RwLock`, so a commit is a single write
/// and readers never see half of one. Each SKU also has its own row lock
/// which a unit of work holds from its first reservation on that SKU until
/// it commits or is dropped, serializing check-then-decrement per SKU.
///
/// Locks are always taken row first, tables second.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<Mutex<HashMap<Sku, Arc<Mutex<()>>>>>,
    last_order_id: Arc<AtomicI64>,
    fail_on_commit: Arc<AtomicBool>,
    commit_delay_ms: Arc<AtomicU64>,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the committed quantity of a SKU, creating the row if needed.
    ///
    /// Waits for any unit of work currently holding the row.
    pub async fn set_stock(&self, sku: Sku, quantity: u32) {
        let row = self.row_lock(&sku).await;
        let _guard = row.lock().await;
        self.tables
            .write()
            .await
            .inventory
            .insert(sku.clone(), InventoryItem::new(sku, quantity));
    }

    /// Makes every following commit fail as if the backend were down.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Delays every following commit, for exercising commit deadlines.
    pub fn set_commit_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.commit_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    async fn row_lock(&self, sku: &Sku) -> Arc<Mutex<()>> {
        self.row_locks
            .lock()
            .await
            .entry(sku.clone())
            .or_default()
            .clone()
    }

    fn next_order_id(&self) -> OrderId {
        OrderId::new(self.last_order_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl CartStore for InMemoryStorage {
    async fn get_cart(&self, customer_id: &CustomerId) -> Result<Option<Cart>> {
        Ok(self.tables.read().await.carts.get(customer_id).cloned())
    }

    async fn add_line(&self, customer_id: &CustomerId, line: CartLine) -> Result<Cart> {
        let mut tables = self.tables.write().await;
        let cart = tables
            .carts
            .entry(customer_id.clone())
            .or_insert_with(|| Cart::new(customer_id.clone()));
        cart.add_line(line)?;
        Ok(cart.clone())
    }
}

#[async_trait]
impl CheckoutStorage for InMemoryStorage {
    type Work = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork> {
        Ok(InMemoryUnitOfWork {
            storage: self.clone(),
            held: HashMap::new(),
            orders: Vec::new(),
            cleared_carts: Vec::new(),
        })
    }

    async fn inventory_level(&self, sku: &Sku) -> Result<Option<u32>> {
        Ok(self
            .tables
            .read()
            .await
            .inventory
            .get(sku)
            .map(|item| item.quantity))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn order_for_attempt(&self, attempt_id: AttemptId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .attempts
            .get(&attempt_id)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn orders_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .rev()
            .filter(|o| o.customer_id() == customer_id)
            .cloned()
            .collect())
    }
}

/// A SKU row held by a unit of work.
struct HeldRow {
    _guard: OwnedMutexGuard<()>,
    /// Working copy: committed quantity minus this unit of work's reservations.
    working: InventoryItem,
    reserved: u32,
}

/// Unit of work over [`InMemoryStorage`].
pub struct InMemoryUnitOfWork {
    storage: InMemoryStorage,
    held: HashMap<Sku, HeldRow>,
    orders: Vec<(AttemptId, Order)>,
    cleared_carts: Vec<CustomerId>,
}

impl InMemoryUnitOfWork {
    /// Returns the units reserved so far for a SKU.
    pub fn reserved(&self, sku: &Sku) -> u32 {
        self.held.get(sku).map_or(0, |row| row.reserved)
    }
}

#[async_trait]
impl InventoryLedger for InMemoryUnitOfWork {
    #[tracing::instrument(skip(self))]
    async fn try_reserve(&mut self, sku: &Sku, quantity: u32) -> Result<Reservation> {
        if !self.held.contains_key(sku) {
            let guard = self.storage.row_lock(sku).await.lock_owned().await;
            let committed = self
                .storage
                .tables
                .read()
                .await
                .inventory
                .get(sku)
                .map_or(0, |item| item.quantity);
            self.held.insert(
                sku.clone(),
                HeldRow {
                    _guard: guard,
                    working: InventoryItem::new(sku.clone(), committed),
                    reserved: 0,
                },
            );
        }

        let Some(row) = self.held.get_mut(sku) else {
            return Err(StoreError::Corrupt(format!("row for {sku} vanished")));
        };

        match row.working.try_decrement(quantity) {
            Some(remaining) => {
                row.reserved += quantity;
                Ok(Reservation::Reserved { remaining })
            }
            None => {
                let available = row.working.quantity;
                if row.reserved == 0 {
                    self.held.remove(sku);
                }
                Ok(Reservation::Insufficient { available })
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn release(&mut self, sku: &Sku, quantity: u32) -> Result<()> {
        let reserved = self.reserved(sku);
        if quantity > reserved {
            return Err(StoreError::ReleaseExceedsReservation {
                sku: sku.clone(),
                requested: quantity,
                reserved,
            });
        }

        if let Some(row) = self.held.get_mut(sku) {
            row.reserved -= quantity;
            row.working.quantity += quantity;
            if row.reserved == 0 {
                self.held.remove(sku);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryUnitOfWork {
    async fn create_order(&mut self, attempt_id: AttemptId, draft: OrderDraft) -> Result<Order> {
        if self.orders.iter().any(|(id, _)| *id == attempt_id) {
            return Err(StoreError::DuplicateAttempt(attempt_id));
        }
        let order = Order::from_draft(self.storage.next_order_id(), Utc::now(), draft);
        self.orders.push((attempt_id, order.clone()));
        Ok(order)
    }
}

#[async_trait]
impl CartWriter for InMemoryUnitOfWork {
    async fn clear_lines(&mut self, customer_id: &CustomerId) -> Result<()> {
        self.cleared_carts.push(customer_id.clone());
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    #[tracing::instrument(skip(self))]
    async fn commit(self) -> Result<()> {
        let delay = self.storage.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.storage.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }

        let mut tables = self.storage.tables.write().await;

        // Validate every row before touching any, so a failure leaves nothing behind.
        for (sku, row) in &self.held {
            let committed = tables.inventory.get(sku).map_or(0, |item| item.quantity);
            if committed < row.reserved {
                return Err(StoreError::Corrupt(format!(
                    "{sku} has {committed} committed but {} reserved",
                    row.reserved
                )));
            }
        }
        if let Some((attempt_id, _)) = self
            .orders
            .iter()
            .find(|(id, _)| tables.attempts.contains_key(id))
        {
            return Err(StoreError::DuplicateAttempt(*attempt_id));
        }

        for (sku, row) in &self.held {
            if let Some(item) = tables.inventory.get_mut(sku) {
                item.try_decrement(row.reserved);
            }
        }
        for (attempt_id, order) in &self.orders {
            tables.attempts.insert(*attempt_id, order.id());
            tables.orders.insert(order.id(), order.clone());
        }
        for customer_id in &self.cleared_carts {
            if let Some(cart) = tables.carts.get_mut(customer_id) {
                cart.clear();
            }
        }

        tracing::debug!("unit of work committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        tracing::debug!(rows = self.held.len(), "unit of work rolled back");
        Ok(())
    }
}
