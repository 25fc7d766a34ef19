//! Error taxonomy for the terminal contract and the order engine

use std::time::Duration;

use thiserror::Error;

use crate::types::{OrderId, OrderKind, Side, Ticket};

/// Failures raised by a [`Terminal`](crate::terminal::Terminal) implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TerminalError {
    #[error("terminal did not answer within {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed terminal reply: {0}")]
    Decode(String),

    #[error("terminal reported an error: {0}")]
    Remote(String),
}

pub type TerminalResult<T> = Result<T, TerminalError>;

/// Errors surfaced by the broker, either returned to the caller or queued
/// as alerts for the owner to drain
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    /// Transport failure; never fatal to the engine
    #[error("transport error: {0}")]
    Transport(#[from] TerminalError),

    /// The terminal answered a request with `error = true`
    #[error("order {id} refused by terminal: {description}")]
    Protocol { id: OrderId, description: String },

    #[error(
        "fill received for order {id} with price {price} and size {size} \
         but the order is no longer alive and is not a bracket"
    )]
    UnmatchedFill { id: OrderId, price: f64, size: f64 },

    #[error("OCO resolution invoked on live order {0}")]
    OcoOnLiveOrder(OrderId),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("order not cancelled: ref={id}, ticket={ticket}, error={reason}")]
    CancelFailed {
        id: OrderId,
        ticket: Ticket,
        reason: String,
    },

    #[error("unsupported order kind {kind:?} for {side:?} orders")]
    UnsupportedOrderType { kind: OrderKind, side: Side },

    #[error("order size must be positive, got {0}")]
    InvalidSize(f64),

    #[error("parent order {0} is unknown")]
    MissingParent(OrderId),

    #[error("no pending bracket legs for parent {0}")]
    MissingPendingBracket(OrderId),

    #[error("bracket {0} already holds a primary and a deferred leg")]
    BracketFull(OrderId),
}

impl BrokerError {
    /// Errors that indicate local and remote state have diverged
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            BrokerError::UnmatchedFill { .. }
                | BrokerError::OcoOnLiveOrder(_)
                | BrokerError::UnknownOrder(_)
        )
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
