//! Storage for the checkout core.
//!
//! Carts, inventory rows and orders are read directly from a
//! [`CheckoutStorage`]; every mutation made by a checkout attempt goes
//! through a [`UnitOfWork`] that is committed (or discarded) as a whole.
//!
//! Two implementations are provided: [`InMemoryStorage`] for tests and
//! single-process deployments, and [`PostgresStorage`] backed by `sqlx`.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStorage, InMemoryUnitOfWork};
pub use postgres::{PostgresStorage, PostgresUnitOfWork};
pub use store::{
    CartStore, CartWriter, CheckoutStorage, InventoryLedger, OrderStore, Reservation, UnitOfWork,
};
