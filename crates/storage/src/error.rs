use std::time::Duration;

use common::AttemptId;
use domain::{DomainError, Sku};
use thiserror::Error;

/// Errors that can occur when interacting with checkout storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The storage backend refused or could not perform the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish within its deadline.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored record could not be turned back into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The data would break a domain rule, e.g. a cart quantity overflow.
    #[error("Invalid data: {0}")]
    Invalid(#[from] DomainError),

    /// An order already exists for this checkout attempt.
    #[error("An order was already committed for attempt {0}")]
    DuplicateAttempt(AttemptId),

    /// A release asked to give back more than this unit of work reserved.
    #[error("Cannot release {requested} of {sku}: only {reserved} reserved")]
    ReleaseExceedsReservation {
        sku: Sku,
        requested: u32,
        reserved: u32,
    },
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
