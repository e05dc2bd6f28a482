use async_trait::async_trait;
use common::AttemptId;
use domain::{Cart, CartLine, CustomerId, Order, OrderDraft, OrderId, Sku};

use crate::Result;

/// Outcome of a conditional inventory decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The units were taken; `remaining` is what this unit of work now sees.
    Reserved { remaining: u32 },
    /// Not enough stock. Nothing was taken.
    Insufficient { available: u32 },
}

impl Reservation {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Reservation::Reserved { .. })
    }
}

/// Read and populate customer carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Loads the cart of a customer. Returns None if the customer never
    /// added anything.
    async fn get_cart(&self, customer_id: &CustomerId) -> Result<Option<Cart>>;

    /// Adds a line to the customer's cart, creating the cart if needed.
    ///
    /// A line for a SKU already in the cart merges into it. Fails with
    /// [`StoreError::Invalid`](crate::StoreError::Invalid), changing
    /// nothing, if the merge would overflow a quantity or total.
    async fn add_line(&self, customer_id: &CustomerId, line: CartLine) -> Result<Cart>;
}

/// Buffered, per-SKU stock reservations.
///
/// A successful reservation locks the SKU's row until the owning unit of
/// work commits or is discarded: a concurrent reservation on the same SKU
/// waits and is then evaluated against the committed quantity, so two
/// attempts can never both take the last units.
#[async_trait]
pub trait InventoryLedger: Send {
    /// Decrements `sku` by `quantity` only if the result stays non-negative.
    ///
    /// An unknown SKU reports `Insufficient { available: 0 }`.
    async fn try_reserve(&mut self, sku: &Sku, quantity: u32) -> Result<Reservation>;

    /// Gives back units reserved earlier in the same unit of work.
    async fn release(&mut self, sku: &Sku, quantity: u32) -> Result<()>;
}

/// Append-only order creation.
#[async_trait]
pub trait OrderStore: Send {
    /// Creates an order from a draft, assigning its id and creation time.
    ///
    /// At most one order is ever committed per `attempt_id`; a second one
    /// fails with [`StoreError::DuplicateAttempt`](crate::StoreError::DuplicateAttempt)
    /// here or at commit.
    async fn create_order(&mut self, attempt_id: AttemptId, draft: OrderDraft) -> Result<Order>;
}

/// Buffered cart mutation.
#[async_trait]
pub trait CartWriter: Send {
    /// Removes every line from the customer's cart. The cart itself stays.
    async fn clear_lines(&mut self, customer_id: &CustomerId) -> Result<()>;
}

/// The set of buffered mutations made by one checkout attempt.
///
/// Inventory decrements, created orders and cart clears become visible
/// together on [`commit`](UnitOfWork::commit), or not at all. Dropping a
/// unit of work without committing discards everything and releases its
/// row locks.
#[async_trait]
pub trait UnitOfWork: InventoryLedger + OrderStore + CartWriter + Sized {
    /// Makes every buffered change durable in one atomic write.
    async fn commit(self) -> Result<()>;

    /// Discards every buffered change.
    async fn rollback(self) -> Result<()>;
}

/// Root storage handle used by the checkout orchestrator.
#[async_trait]
pub trait CheckoutStorage: CartStore {
    /// The unit of work type handed out by [`begin`](CheckoutStorage::begin).
    type Work: UnitOfWork + 'static;

    /// Opens a new unit of work.
    async fn begin(&self) -> Result<Self::Work>;

    /// Returns the committed quantity for a SKU, or None if unknown.
    async fn inventory_level(&self, sku: &Sku) -> Result<Option<u32>>;

    /// Loads a committed order.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads the order committed by a checkout attempt, if any.
    async fn order_for_attempt(&self, attempt_id: AttemptId) -> Result<Option<Order>>;

    /// Returns a customer's committed orders, newest first.
    async fn orders_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>>;
}
