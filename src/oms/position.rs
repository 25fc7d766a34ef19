//! Net position ledger with average-price accounting

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Symbol, SIZE_EPSILON};

/// Net position on one instrument
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Signed size (negative = short)
    pub size: f64,

    /// Volume-weighted average entry price (0 when flat)
    pub price: f64,
}

/// Outcome of applying one fill to a position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    /// Size after the update
    pub size: f64,

    /// Average price after the update
    pub price: f64,

    /// Average price before the update
    pub price_before: f64,

    /// Part of the fill that opened exposure (signed like the fill)
    pub opened: f64,

    /// Part of the fill that closed exposure (signed like the fill)
    pub closed: f64,

    /// P&L realized by the closed part
    pub realized_pnl: f64,
}

impl Position {
    pub fn new(size: f64, price: f64) -> Self {
        Self { size, price }
    }

    pub fn is_flat(&self) -> bool {
        self.size.abs() <= SIZE_EPSILON
    }

    /// Apply a signed fill
    ///
    /// Adding to a position re-averages the price; reducing keeps it;
    /// crossing through zero restarts the average at the fill price.
    pub fn update(&mut self, size: f64, price: f64) -> PositionUpdate {
        let price_before = self.price;
        let old = self.size;
        self.size += size;
        if self.is_flat() {
            self.size = 0.0;
        }

        let (opened, closed) = if self.size == 0.0 {
            self.price = 0.0;
            (0.0, size)
        } else if old.abs() <= SIZE_EPSILON {
            self.price = price;
            (size, 0.0)
        } else if old.signum() == size.signum() {
            self.price = (self.price * old + size * price) / self.size;
            (size, 0.0)
        } else if self.size.signum() == old.signum() {
            (0.0, size)
        } else {
            // Reversed: the old position closed entirely, the rest opened
            self.price = price;
            (self.size, -old)
        };

        let realized_pnl = -closed * (price - price_before);

        PositionUpdate {
            size: self.size,
            price: self.price,
            price_before,
            opened,
            closed,
            realized_pnl,
        }
    }
}

/// Ledger of net positions keyed by symbol
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<Symbol, Position>,
}

impl PositionLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
        }
    }

    /// Apply a signed fill, creating a flat position on first reference
    pub fn update(&mut self, symbol: &Symbol, size: f64, price: f64) -> PositionUpdate {
        self.positions
            .entry(symbol.clone())
            .or_default()
            .update(size, price)
    }

    /// Merge a position reported by the terminal
    pub fn merge(&mut self, symbol: &Symbol, size: f64, price: f64) {
        let position = self.positions.entry(symbol.clone()).or_default();
        if position.is_flat() {
            *position = if size.abs() <= SIZE_EPSILON {
                Position::default()
            } else {
                Position::new(size, price)
            };
        } else {
            position.update(size, price);
        }
    }

    /// Current position; flat when never referenced
    pub fn get(&self, symbol: &Symbol) -> Position {
        self.positions.get(symbol).copied().unwrap_or_default()
    }

    /// All non-flat positions
    pub fn open_positions(&self) -> impl Iterator<Item = (&Symbol, &Position)> {
        self.positions.iter().filter(|(_, p)| !p.is_flat())
    }

    /// Drop every position
    pub fn clear(&mut self) {
        self.positions.clear();
    }
}
