//! Inventory rows.

use serde::{Deserialize, Serialize};

use crate::value_objects::Sku;

/// Available quantity of a single SKU. The quantity can never go negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub sku: Sku,
    pub quantity: u32,
}

impl InventoryItem {
    pub fn new(sku: Sku, quantity: u32) -> Self {
        Self { sku, quantity }
    }

    /// Returns true if `requested` units can be taken without going negative.
    pub fn can_reserve(&self, requested: u32) -> bool {
        self.quantity >= requested
    }

    /// Decrements the quantity only if the result stays non-negative.
    ///
    /// Returns the remaining quantity, or `None` (leaving the row untouched)
    /// when there is not enough stock.
    pub fn try_decrement(&mut self, requested: u32) -> Option<u32> {
        let remaining = self.quantity.checked_sub(requested)?;
        self.quantity = remaining;
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: u32) -> InventoryItem {
        InventoryItem::new(Sku::parse("SKU-1").unwrap(), quantity)
    }

    #[test]
    fn test_try_decrement_within_stock() {
        let mut row = item(5);
        assert_eq!(row.try_decrement(2), Some(3));
        assert_eq!(row.quantity, 3);
    }

    #[test]
    fn test_try_decrement_to_zero() {
        let mut row = item(2);
        assert_eq!(row.try_decrement(2), Some(0));
        assert!(!row.can_reserve(1));
    }

    #[test]
    fn test_try_decrement_refuses_to_go_negative() {
        let mut row = item(1);
        assert_eq!(row.try_decrement(2), None);
        assert_eq!(row.quantity, 1);
    }
}
