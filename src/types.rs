//! Core value types shared by the engine, the terminal contract and the broker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local order identifier - stable for the lifetime of the record
pub type OrderId = u64;

/// Identifier assigned by the terminal (order or position ticket)
pub type Ticket = u64;

/// Sizes at or below this magnitude are treated as zero
pub const SIZE_EPSILON: f64 = 1e-8;

/// Instrument symbol as known by the terminal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol(s)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position opened on `self`
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// Execution type requested for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Execute immediately at the terminal's price
    Market,
    /// Buy at or below / sell at or above `price`
    Limit,
    /// Becomes a market order once `price` trades
    Stop,
    /// Becomes a limit order at `price_limit` once `price` trades
    StopLimit,
}

/// Order lifecycle status
///
/// `Created → Submitted → Accepted → {Partial → Accepted}* → terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Submitted,
    Accepted,
    Partial,
    Completed,
    Canceled,
    Expired,
    Margin,
    Rejected,
}

impl OrderStatus {
    /// Whether the order can still change state
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            OrderStatus::Created
                | OrderStatus::Submitted
                | OrderStatus::Accepted
                | OrderStatus::Partial
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_alive()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrderStatus::Created => "Created",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::Accepted => "Accepted",
            OrderStatus::Partial => "Partial",
            OrderStatus::Completed => "Completed",
            OrderStatus::Canceled => "Canceled",
            OrderStatus::Expired => "Expired",
            OrderStatus::Margin => "Margin",
            OrderStatus::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

/// How long an order stays working at the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Validity {
    /// Good till cancelled
    #[default]
    Gtc,
    /// Good till date
    Until(DateTime<Utc>),
}

/// Account balance as last reported by the terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Cash balance
    pub balance: f64,
    /// Account value including open positions
    pub equity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive_statuses() {
        assert!(OrderStatus::Created.is_alive());
        assert!(OrderStatus::Partial.is_alive());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Margin.is_terminal());
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.sign(), -1.0);
    }
}
