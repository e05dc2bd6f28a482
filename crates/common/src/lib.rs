//! Shared identifiers used across the checkout crates.

pub mod types;

pub use types::AttemptId;
