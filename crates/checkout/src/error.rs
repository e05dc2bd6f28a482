//! Checkout error types.

use common::AttemptId;
use domain::{CustomerId, Sku};
use serde::Serialize;
use storage::StoreError;
use thiserror::Error;

use crate::payment::PaymentFault;

/// Why a checkout attempt ended without an order.
///
/// Every variant except [`Persistence`](CheckoutError::Persistence) leaves
/// inventory, orders and the cart exactly as they were.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Malformed input, rejected before anything is touched.
    #[error("{0}")]
    Validation(String),

    /// The customer has no cart, or it has no lines.
    #[error("Cart is empty for customer {0}")]
    CartEmpty(CustomerId),

    /// A line asked for more units than the committed stock. Names the
    /// first SKU (in reservation order) that could not be covered.
    #[error("Insufficient stock for {sku}")]
    InsufficientStock { sku: Sku },

    /// The idempotency key cannot be used for this request: it already
    /// committed an order, belongs to another customer or cart, or its
    /// payment is being reversed.
    #[error("Idempotency key {attempt_id} cannot be used: {reason}")]
    IdempotencyConflict {
        attempt_id: AttemptId,
        reason: String,
    },

    /// The payment provider could not produce a decision. After a
    /// [`PaymentFault::Timeout`] the charge may still have gone through;
    /// it is queued for reconciliation under `attempt_id`.
    #[error("Payment fault for checkout {attempt_id}: {fault}")]
    PaymentFault {
        attempt_id: AttemptId,
        #[source]
        fault: PaymentFault,
    },

    /// The payment step finished but the unit of work could not be
    /// committed. When `payment_captured` is set the charge has been queued
    /// for reconciliation under `attempt_id`.
    #[error("Checkout {attempt_id} could not be persisted: {source}")]
    Persistence {
        attempt_id: AttemptId,
        payment_captured: bool,
        #[source]
        source: StoreError,
    },

    /// Anything else. The message is for logs, not for callers.
    #[error("Unexpected checkout failure: {0}")]
    Unexpected(String),
}

/// Coarse classification of a [`CheckoutError`], stable for callers and
/// metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    CartEmpty,
    InsufficientStock,
    IdempotencyConflict,
    PaymentFault,
    Persistence,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::CartEmpty => "cart_empty",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::IdempotencyConflict => "idempotency_conflict",
            ErrorKind::PaymentFault => "payment_fault",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::Validation(_) => ErrorKind::Validation,
            CheckoutError::CartEmpty(_) => ErrorKind::CartEmpty,
            CheckoutError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CheckoutError::IdempotencyConflict { .. } => ErrorKind::IdempotencyConflict,
            CheckoutError::PaymentFault { .. } => ErrorKind::PaymentFault,
            CheckoutError::Persistence { .. } => ErrorKind::Persistence,
            CheckoutError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Message safe to hand back to a caller.
    ///
    /// Unexpected failures are reduced to a generic sentence; their details
    /// only go to the logs.
    pub fn public_message(&self) -> String {
        match self {
            CheckoutError::Unexpected(_) => "An unexpected error occurred".to_string(),
            CheckoutError::PaymentFault {
                attempt_id,
                fault: fault @ PaymentFault::Timeout(_),
            } => format!(
                "{fault}; retry checkout {attempt_id} with the same idempotency key, otherwise any charge will be reversed"
            ),
            CheckoutError::PaymentFault { attempt_id, fault } => {
                format!("{fault}; checkout {attempt_id} was not charged")
            }
            CheckoutError::Persistence {
                attempt_id,
                payment_captured: true,
                ..
            } => format!(
                "Checkout {attempt_id} could not be saved; the payment will be reversed unless retried"
            ),
            CheckoutError::Persistence { attempt_id, .. } => {
                format!("Checkout {attempt_id} could not be saved")
            }
            other => other.to_string(),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
