//! Customer carts.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::{CustomerId, Money, Sku};

/// A line in a customer's cart.
///
/// The unit price is snapshotted when the line is added; checkout bills
/// this price, never a live catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub sku: Sku,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl CartLine {
    /// Creates a cart line, validating quantity (at least one), price
    /// (not negative) and that the line total fits in [`Money`].
    pub fn new(
        sku: Sku,
        name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                sku: sku.to_string(),
                quantity,
            });
        }
        if unit_price.is_negative() {
            return Err(DomainError::InvalidPrice {
                sku: sku.to_string(),
                cents: unit_price.cents(),
            });
        }
        let line = Self {
            sku,
            name: name.into(),
            unit_price,
            quantity,
        };
        line.line_total()?;
        Ok(line)
    }

    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.unit_price
            .checked_mul(self.quantity)
            .ok_or_else(|| DomainError::AmountOverflow(format!("line {}", self.sku)))
    }
}

/// A customer's pending line items, in insertion order.
///
/// Carts are emptied, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    customer_id: CustomerId,
    lines: Vec<CartLine>,
}

impl Cart {
    /// Creates an empty cart for a customer.
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            lines: Vec::new(),
        }
    }

    /// Rebuilds a cart from stored lines, preserving their order.
    pub fn with_lines(customer_id: CustomerId, lines: Vec<CartLine>) -> Self {
        Self { customer_id, lines }
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of `unit_price * quantity` over every line.
    pub fn total(&self) -> Result<Money, DomainError> {
        self.lines.iter().try_fold(Money::zero(), |total, line| {
            total.checked_add(line.line_total()?).ok_or_else(|| {
                DomainError::AmountOverflow(format!("cart of {}", self.customer_id))
            })
        })
    }

    /// Adds a line. When the SKU is already in the cart the quantities are
    /// merged and the first price snapshot is kept.
    ///
    /// Fails, leaving the cart untouched, if the merged quantity, the line
    /// total or the cart total would overflow.
    pub fn add_line(&mut self, line: CartLine) -> Result<(), DomainError> {
        let mut lines = self.lines.clone();
        match lines.iter_mut().find(|l| l.sku == line.sku) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(line.quantity)
                    .ok_or_else(|| DomainError::QuantityOverflow {
                        sku: line.sku.to_string(),
                        max: u32::MAX,
                    })?;
            }
            None => lines.push(line),
        }

        let merged = Cart {
            customer_id: self.customer_id.clone(),
            lines,
        };
        merged.total()?;
        *self = merged;
        Ok(())
    }

    /// Removes every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku(s: &str) -> Sku {
        Sku::parse(s).unwrap()
    }

    fn line(code: &str, cents: i64, quantity: u32) -> CartLine {
        CartLine::new(sku(code), code, Money::from_cents(cents), quantity).unwrap()
    }

    fn cart() -> Cart {
        Cart::new(CustomerId::parse("alice").unwrap())
    }

    #[test]
    fn test_cart_line_rejects_zero_quantity() {
        let err = CartLine::new(sku("SKU-1"), "Widget", Money::from_cents(100), 0).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity { quantity: 0, .. }));
    }

    #[test]
    fn test_cart_line_rejects_negative_price() {
        let err = CartLine::new(sku("SKU-1"), "Widget", Money::from_cents(-1), 1).unwrap_err();
        assert!(matches!(err, DomainError::InvalidPrice { cents: -1, .. }));
    }

    #[test]
    fn test_total_sums_snapshotted_prices() {
        let mut cart = cart();
        cart.add_line(line("SKU-1", 1000, 2)).unwrap();
        cart.add_line(line("SKU-2", 500, 1)).unwrap();
        assert_eq!(cart.total(), Ok(Money::from_cents(2500)));
    }

    #[test]
    fn test_add_line_merges_same_sku_and_keeps_first_price() {
        let mut cart = cart();
        cart.add_line(line("SKU-1", 1000, 1)).unwrap();
        cart.add_line(line("SKU-1", 1200, 2)).unwrap();

        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 3);
        assert_eq!(cart.lines()[0].unit_price, Money::from_cents(1000));
    }

    #[test]
    fn test_merging_past_u32_max_is_rejected() {
        let mut cart = cart();
        cart.add_line(line("SKU-1", 1, 4_000_000_000)).unwrap();

        let err = cart.add_line(line("SKU-1", 1, 4_000_000_000)).unwrap_err();
        assert!(matches!(err, DomainError::QuantityOverflow { .. }));
        assert_eq!(cart.lines()[0].quantity, 4_000_000_000);
    }

    #[test]
    fn test_line_total_overflow_is_rejected() {
        let err = CartLine::new(sku("SKU-1"), "Yacht", Money::from_cents(i64::MAX / 2), 3)
            .unwrap_err();
        assert!(matches!(err, DomainError::AmountOverflow(_)));
    }

    #[test]
    fn test_cart_total_overflow_leaves_cart_untouched() {
        let mut cart = cart();
        cart.add_line(line("SKU-1", i64::MAX / 2 + 1, 1)).unwrap();

        let err = cart.add_line(line("SKU-2", i64::MAX / 2 + 1, 1)).unwrap_err();
        assert!(matches!(err, DomainError::AmountOverflow(_)));
        assert_eq!(cart.lines().len(), 1);
    }

    #[test]
    fn test_lines_keep_insertion_order() {
        let mut cart = cart();
        cart.add_line(line("SKU-B", 1, 1)).unwrap();
        cart.add_line(line("SKU-A", 1, 1)).unwrap();
        let skus: Vec<&str> = cart.lines().iter().map(|l| l.sku.as_str()).collect();
        assert_eq!(skus, ["SKU-B", "SKU-A"]);
    }

    #[test]
    fn test_clear_empties_but_keeps_owner() {
        let mut cart = cart();
        cart.add_line(line("SKU-1", 1, 1)).unwrap();
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.customer_id().as_str(), "alice");
        assert_eq!(cart.total(), Ok(Money::zero()));
    }
}
