//! Domain model for the checkout system.
//!
//! This crate holds the plain data the checkout core moves around:
//! - Identifiers and money (`CustomerId`, `Sku`, `OrderId`, `Money`)
//! - The customer's `Cart` and its `CartLine`s
//! - Per-SKU `InventoryItem` rows
//! - Immutable `Order` records and the `OrderDraft` they are created from
//!
//! Nothing here performs I/O; storage and orchestration live in the
//! `storage` and `checkout` crates.

pub mod cart;
pub mod error;
pub mod inventory;
pub mod order;
pub mod value_objects;

pub use cart::{Cart, CartLine};
pub use error::{DomainError, Result};
pub use inventory::InventoryItem;
pub use order::{Order, OrderDraft, OrderLine, OrderStatus};
pub use value_objects::{CustomerId, Money, OrderId, Sku};
