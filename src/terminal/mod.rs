//! Terminal abstraction
//!
//! The terminal is the source of truth for orders and positions. The broker
//! only talks to it through [`Terminal`]; transports (sockets, framing,
//! timeouts, reconnects) live behind an implementation of this trait.

pub mod paper;
pub mod protocol;

use async_trait::async_trait;

use crate::error::TerminalResult;
use crate::types::{Balance, Symbol, Ticket};

pub use paper::PaperTerminal;
pub use protocol::{
    LiveTick, OrderSnapshot, PositionSnapshot, RemoteOrderState, RemoteOrderType, TradeReply,
    TradeRequest, TransactionEvent, TransactionType,
};

/// Remote trading terminal contract
#[async_trait]
pub trait Terminal: Send + Sync + 'static {
    /// Verify the session is logged in and trading is allowed
    async fn check_account(&self) -> TerminalResult<()>;

    /// Send an order creation request
    ///
    /// A refused request is still `Ok`; the reply carries `error = true`.
    async fn create_order(&self, request: &TradeRequest) -> TerminalResult<TradeReply>;

    /// Cancel a pending order
    async fn cancel_order(&self, ticket: Ticket, symbol: &Symbol) -> TerminalResult<TradeReply>;

    /// Close an open position at market
    async fn close_position(&self, ticket: Ticket, symbol: &Symbol)
        -> TerminalResult<TradeReply>;

    async fn fetch_positions(&self) -> TerminalResult<Vec<PositionSnapshot>>;

    async fn fetch_orders(&self) -> TerminalResult<Vec<OrderSnapshot>>;

    async fn fetch_balance(&self) -> TerminalResult<Balance>;

    /// Next streaming trade transaction; `None` once the stream is closed
    async fn next_event(&self) -> Option<TerminalResult<TransactionEvent>>;

    /// Next live tick; `None` once the stream is closed
    async fn next_tick(&self) -> Option<TerminalResult<LiveTick>>;
}
