//! Orders and their line snapshots.
//!
//! An [`Order`] is append-only: once created from an [`OrderDraft`] its
//! header and lines are never mutated again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::{Cart, CartLine};
use crate::error::DomainError;
use crate::value_objects::{CustomerId, Money, OrderId, Sku};

/// Outcome recorded on an order.
///
/// There is no pending state: an order is only created once the payment
/// outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// The payment was taken.
    Paid,
    /// The payment was declined.
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Paid => "Paid",
            OrderStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Paid" => Ok(OrderStatus::Paid),
            "Failed" => Ok(OrderStatus::Failed),
            other => Err(DomainError::UnknownOrderStatus(other.to_string())),
        }
    }
}

/// A cart line copied onto an order at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: Sku,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderLine {
    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.unit_price
            .checked_mul(self.quantity)
            .ok_or_else(|| DomainError::AmountOverflow(format!("order line {}", self.sku)))
    }
}

impl From<&CartLine> for OrderLine {
    fn from(line: &CartLine) -> Self {
        Self {
            sku: line.sku.clone(),
            name: line.name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
        }
    }
}

/// Everything needed to create an order except the identity and
/// timestamp, which the order store assigns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub total: Money,
    pub lines: Vec<OrderLine>,
}

impl OrderDraft {
    /// Snapshots every cart line 1:1 onto a draft with the given total.
    pub fn from_cart(cart: &Cart, status: OrderStatus, total: Money) -> Self {
        Self {
            customer_id: cart.customer_id().clone(),
            status,
            total,
            lines: cart.lines().iter().map(OrderLine::from).collect(),
        }
    }
}

/// A persisted, immutable order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    status: OrderStatus,
    total: Money,
    created_at: DateTime<Utc>,
    lines: Vec<OrderLine>,
}

impl Order {
    /// Materializes a draft with its assigned identity and creation time.
    pub fn from_draft(id: OrderId, created_at: DateTime<Utc>, draft: OrderDraft) -> Self {
        Self {
            id,
            customer_id: draft.customer_id,
            status: draft.status,
            total: draft.total,
            created_at,
            lines: draft.lines,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart() -> Cart {
        let mut cart = Cart::new(CustomerId::parse("alice").unwrap());
        cart.add_line(
            CartLine::new(Sku::parse("SKU-1").unwrap(), "Widget", Money::from_cents(1000), 2)
                .unwrap(),
        )
        .unwrap();
        cart.add_line(
            CartLine::new(Sku::parse("SKU-2").unwrap(), "Gadget", Money::from_cents(500), 1)
                .unwrap(),
        )
        .unwrap();
        cart
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("Paid".parse::<OrderStatus>().unwrap(), OrderStatus::Paid);
        assert_eq!("Failed".parse::<OrderStatus>().unwrap(), OrderStatus::Failed);
        assert!("Pending".parse::<OrderStatus>().is_err());
        assert_eq!(OrderStatus::Paid.to_string(), "Paid");
    }

    #[test]
    fn test_draft_snapshots_every_cart_line() {
        let cart = cart();
        let draft = OrderDraft::from_cart(&cart, OrderStatus::Paid, cart.total().unwrap());

        assert_eq!(draft.customer_id.as_str(), "alice");
        assert_eq!(draft.total, Money::from_cents(2500));
        assert_eq!(draft.lines.len(), 2);
        assert_eq!(draft.lines[0].sku.as_str(), "SKU-1");
        assert_eq!(draft.lines[0].quantity, 2);
        assert_eq!(draft.lines[1].line_total(), Ok(Money::from_cents(500)));
    }

    #[test]
    fn test_order_from_draft_keeps_fields() {
        let cart = cart();
        let draft = OrderDraft::from_cart(&cart, OrderStatus::Failed, cart.total().unwrap());
        let now = Utc::now();
        let order = Order::from_draft(OrderId::new(7), now, draft);

        assert_eq!(order.id(), OrderId::new(7));
        assert_eq!(order.status(), OrderStatus::Failed);
        assert_eq!(order.total(), Money::from_cents(2500));
        assert_eq!(order.created_at(), now);
        assert_eq!(order.lines().len(), 2);
    }
}
