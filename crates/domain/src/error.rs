//! Domain error types.

use thiserror::Error;

/// Errors raised while constructing or mutating domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The customer identifier was empty or whitespace.
    #[error("customer id required")]
    CustomerIdRequired,

    /// The SKU was empty or whitespace.
    #[error("sku required")]
    SkuRequired,

    /// A line quantity must be at least one.
    #[error("Invalid quantity {quantity} for {sku}: must be at least 1")]
    InvalidQuantity { sku: String, quantity: u32 },

    /// A unit price must not be negative.
    #[error("Invalid price {cents} for {sku}: must not be negative")]
    InvalidPrice { sku: String, cents: i64 },

    /// Merging a line would take its quantity past the largest storable value.
    #[error("Quantity for {sku} would exceed {max}")]
    QuantityOverflow { sku: String, max: u32 },

    /// A line or cart total does not fit in the money range.
    #[error("Amount overflow in {0}")]
    AmountOverflow(String),

    /// An order status string did not name a known status.
    #[error("Unknown order status: {0}")]
    UnknownOrderStatus(String),
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, DomainError>;
