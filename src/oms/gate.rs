//! Transmission gate for deferred bracket orders
//!
//! A bracket is built from up to three `buy`/`sell` calls. All but the last
//! carry `transmit = false`; the gate holds them until the transmitting leg
//! arrives and then releases the whole bracket at once.

use std::collections::HashMap;

use crate::error::{BrokerError, BrokerResult};
use crate::oms::types::Order;
use crate::types::{OrderId, OrderKind};

/// What the gate decided for an incoming order
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Held back until the rest of the bracket arrives
    Deferred,
    /// A standalone order ready for transmission
    Single(Order),
    /// A complete bracket ready for one atomic transmission
    Bracket {
        primary: Order,
        stop: Option<Order>,
        take_profit: Option<Order>,
    },
}

/// Buffers non-transmitting orders per bracket
#[derive(Debug, Default)]
pub struct TransmissionGate {
    /// primary id → `[primary, leg?]`
    pending: HashMap<OrderId, Vec<Order>>,
}

impl TransmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route an order through the gate
    ///
    /// Errors leave the gate unchanged.
    pub fn admit(&mut self, order: Order) -> BrokerResult<GateOutcome> {
        let key = order.bracket_key();

        if !order.transmit {
            let list = self.pending.entry(key).or_default();
            if list.len() >= 2 {
                return Err(BrokerError::BracketFull(key));
            }
            list.push(order);
            return Ok(GateOutcome::Deferred);
        }

        let Some(parent) = order.parent else {
            return Ok(GateOutcome::Single(order));
        };

        let mut list = self
            .pending
            .remove(&parent)
            .ok_or(BrokerError::MissingPendingBracket(parent))?;
        let Some(idx) = list.iter().position(|o| o.id == parent) else {
            self.pending.insert(parent, list);
            return Err(BrokerError::MissingPendingBracket(parent));
        };
        let primary = list.remove(idx);

        let (stop, take_profit) = match list.pop() {
            Some(other) => (Some(other), Some(order)),
            None if matches!(order.kind, OrderKind::Stop | OrderKind::StopLimit) => {
                (Some(order), None)
            }
            None => (None, Some(order)),
        };

        Ok(GateOutcome::Bracket {
            primary,
            stop,
            take_profit,
        })
    }

    /// A deferred order, if the gate is holding it
    pub fn pending(&self, id: OrderId) -> Option<&Order> {
        self.pending.values().flatten().find(|o| o.id == id)
    }

    pub fn is_pending(&self, id: OrderId) -> bool {
        self.pending(id).is_some()
    }

    /// Number of brackets waiting for their transmitting leg
    pub fn pending_brackets(&self) -> usize {
        self.pending.len()
    }
}
