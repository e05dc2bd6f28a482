//! Checkout orchestration.
//!
//! Turns a customer's cart into an order while coordinating three
//! independently mutable resources:
//! 1. Load the cart and compute the total from its snapshotted prices
//! 2. Reserve stock for every line (buffered in a unit of work)
//! 3. Charge the payment provider (external, cannot be rolled back)
//! 4. Create the order, clear the cart and commit the unit of work
//!
//! Inventory, order and cart changes commit together or not at all. The
//! payment call sits outside that boundary; when it succeeds but the
//! commit fails, or when it times out, the attempt is queued for reversal
//! in a [`ReconciliationLog`].

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod payment;
pub mod reconciliation;
pub mod state;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, ErrorKind};
pub use orchestrator::{CheckoutOrchestrator, CheckoutRequest};
pub use payment::{
    InMemoryPaymentGateway, PaymentFault, PaymentGateway, PaymentRequest, PaymentResult,
    RefundOutcome, RefundRequest,
};
pub use reconciliation::{
    InMemoryReconciliationLog, ReconciliationEntry, ReconciliationLog, ReconciliationStatus,
    ReversalReport, ReversalWorker, SettleConflict,
};
pub use state::CheckoutState;
