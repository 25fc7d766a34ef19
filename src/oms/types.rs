//! Core OMS types
//!
//! Defines the order record, its execution summary and individual fills.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{OrderId, OrderKind, OrderStatus, Side, Symbol, Validity, SIZE_EPSILON};

/// Individual fill record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Signed fill size (negative for sells)
    pub size: f64,

    /// Fill price
    pub price: f64,

    /// Size that opened exposure
    pub opened: f64,

    /// Size that closed exposure
    pub closed: f64,

    /// Realized P&L of the closed part
    pub pnl: f64,

    /// Fill timestamp
    pub timestamp: DateTime<Utc>,
}

/// Accumulated execution of an order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Signed filled size
    pub size: f64,

    /// Volume-weighted average fill price
    pub price: f64,

    /// Signed size still to be filled
    pub remaining: f64,

    /// Total opened size
    pub opened: f64,

    /// Total closed size
    pub closed: f64,

    /// Value of the executed size (size × price × multiplier)
    pub value: f64,

    /// Commission paid
    pub commission: f64,

    /// Realized P&L
    pub pnl: f64,

    /// Individual fills
    pub fills: Vec<Fill>,
}

/// Order record tracked by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Local order id
    pub id: OrderId,

    /// Instrument
    pub symbol: Symbol,

    /// Order side
    pub side: Side,

    /// Execution type
    pub kind: OrderKind,

    /// Requested size (always positive)
    pub size: f64,

    /// Limit/stop price; `None` for market orders
    pub price: Option<f64>,

    /// Limit price of a stop-limit order
    pub price_limit: Option<f64>,

    /// Time in force
    pub validity: Validity,

    /// Lifecycle status
    pub status: OrderStatus,

    /// Primary order of the bracket this order protects
    pub parent: Option<OrderId>,

    /// Designated OCO partner
    pub oco: Option<OrderId>,

    /// `false` defers transmission until the bracket is complete
    pub transmit: bool,

    /// Protective legs stay inactive until the primary fills
    pub active: bool,

    /// Synthesized locally (reconciliation, external fills)
    pub simulated: bool,

    /// Free-form caller tags
    pub info: BTreeMap<String, String>,

    /// Execution summary
    pub executed: Execution,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create an order in `Created` status
    pub fn new(id: OrderId, symbol: Symbol, side: Side, kind: OrderKind, size: f64) -> Self {
        let now = Utc::now();
        let size = size.abs();
        Self {
            id,
            symbol,
            side,
            kind,
            size,
            price: None,
            price_limit: None,
            validity: Validity::Gtc,
            status: OrderStatus::Created,
            parent: None,
            oco: None,
            transmit: true,
            active: true,
            simulated: false,
            info: BTreeMap::new(),
            executed: Execution {
                remaining: side.sign() * size,
                ..Execution::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_price(mut self, price: Option<f64>) -> Self {
        self.price = price;
        self
    }

    /// Attach the order to a bracket primary; legs start inactive
    pub fn with_parent(mut self, parent: Option<OrderId>) -> Self {
        self.parent = parent;
        self.active = parent.is_none();
        self
    }

    pub fn with_transmit(mut self, transmit: bool) -> Self {
        self.transmit = transmit;
        self
    }

    pub fn simulated(mut self) -> Self {
        self.simulated = true;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }

    /// Requested size with the side's sign applied
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }

    /// Id of the bracket this order belongs to (its parent, or itself)
    pub fn bracket_key(&self) -> OrderId {
        self.parent.unwrap_or(self.id)
    }

    pub(crate) fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Accumulate a fill and move to `Partial` or `Completed`
    ///
    /// Returns `true` when the order is now fully executed.
    pub(crate) fn execute(&mut self, fill: Fill, value: f64, commission: f64) -> bool {
        let exec = &mut self.executed;

        let prev_value = exec.price * exec.size.abs();
        let new_abs = exec.size.abs() + fill.size.abs();
        exec.price = if new_abs > 0.0 {
            (prev_value + fill.price * fill.size.abs()) / new_abs
        } else {
            fill.price
        };

        exec.size += fill.size;
        exec.remaining -= fill.size;
        exec.opened += fill.opened;
        exec.closed += fill.closed;
        exec.value += value;
        exec.commission += commission;
        exec.pnl += fill.pnl;
        exec.fills.push(fill);

        let done = exec.remaining.abs() <= SIZE_EPSILON;
        if done {
            exec.remaining = 0.0;
        }
        self.set_status(if done {
            OrderStatus::Completed
        } else {
            OrderStatus::Partial
        });
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(size: f64, price: f64) -> Fill {
        Fill {
            size,
            price,
            opened: size,
            closed: 0.0,
            pnl: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_order_creation() {
        let order = Order::new(1, Symbol::new("EURUSD"), Side::Sell, OrderKind::Limit, -2.0)
            .with_price(Some(1.1));

        assert_eq!(order.size, 2.0);
        assert_eq!(order.signed_size(), -2.0);
        assert_eq!(order.executed.remaining, -2.0);
        assert_eq!(order.status, OrderStatus::Created);
        assert!(order.is_alive());
        assert!(order.active);
    }

    #[test]
    fn test_leg_starts_inactive() {
        let leg = Order::new(2, Symbol::new("EURUSD"), Side::Sell, OrderKind::Stop, 1.0)
            .with_parent(Some(1));
        assert!(!leg.active);
        assert_eq!(leg.bracket_key(), 1);
    }

    #[test]
    fn test_partial_then_complete() {
        let mut order = Order::new(1, Symbol::new("EURUSD"), Side::Buy, OrderKind::Market, 10.0);

        assert!(!order.execute(fill(3.0, 100.0), 300.0, 0.0));
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.executed.remaining, 7.0);

        assert!(order.execute(fill(7.0, 101.0), 707.0, 0.0));
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.executed.size, 10.0);

        let expected_avg = (100.0 * 3.0 + 101.0 * 7.0) / 10.0;
        assert!((order.executed.price - expected_avg).abs() < 1e-9);
        assert_eq!(order.executed.fills.len(), 2);
    }
}
