//! In-memory paper terminal
//!
//! Keeps a ticket counter, seeded snapshots and a request log. Streaming
//! events and ticks are pushed by the caller (tests, session replay), so the
//! terminal itself never invents lifecycle events.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::protocol::{
    LiveTick, OrderSnapshot, PositionSnapshot, PositionType, RemoteOrderState, TradeReply,
    TradeRequest, TransactionEvent,
};
use super::Terminal;
use crate::config::PaperConfig;
use crate::error::{TerminalError, TerminalResult};
use crate::types::{Balance, Side, Symbol, Ticket};

/// Request received by the paper terminal
#[derive(Debug, Clone, PartialEq)]
pub enum PaperRequest {
    Create(TradeRequest),
    Cancel { ticket: Ticket, symbol: Symbol },
    Close { ticket: Ticket, symbol: Symbol },
}

/// Scripted outcome for the next creation request
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedFailure {
    /// Reply with `error = true` and this description
    Refuse(String),
    /// Fail at the transport level
    Timeout,
}

#[derive(Debug)]
struct PaperState {
    next_ticket: Ticket,
    balance: Balance,
    positions: Vec<PositionSnapshot>,
    orders: Vec<OrderSnapshot>,
    requests: Vec<PaperRequest>,
    next_create_failure: Option<ScriptedFailure>,
    refuse_cancels: Option<String>,
    reply_delay: Option<Duration>,
}

type EventResult = TerminalResult<TransactionEvent>;
type TickResult = TerminalResult<LiveTick>;

/// Paper implementation of [`Terminal`]
pub struct PaperTerminal {
    state: Mutex<PaperState>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<EventResult>>>,
    event_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EventResult>>,
    tick_tx: Mutex<Option<mpsc::UnboundedSender<TickResult>>>,
    tick_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TickResult>>,
}

impl Default for PaperTerminal {
    fn default() -> Self {
        Self::new(&PaperConfig::default())
    }
}

impl PaperTerminal {
    pub fn new(config: &PaperConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(PaperState {
                next_ticket: config.first_ticket,
                balance: Balance {
                    balance: config.balance,
                    equity: config.equity,
                },
                positions: Vec::new(),
                orders: Vec::new(),
                requests: Vec::new(),
                next_create_failure: None,
                refuse_cancels: None,
                reply_delay: None,
            }),
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: tokio::sync::Mutex::new(event_rx),
            tick_tx: Mutex::new(Some(tick_tx)),
            tick_rx: tokio::sync::Mutex::new(tick_rx),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the open positions reported by `fetch_positions`
    pub fn with_positions(self, positions: Vec<PositionSnapshot>) -> Self {
        self.state().positions = positions;
        self
    }

    /// Seed the orders reported by `fetch_orders`
    pub fn with_orders(self, orders: Vec<OrderSnapshot>) -> Self {
        self.state().orders = orders;
        self
    }

    /// Replace the open positions, e.g. after a remote close
    pub fn set_positions(&self, positions: Vec<PositionSnapshot>) {
        self.state().positions = positions;
    }

    pub fn set_balance(&self, balance: Balance) {
        self.state().balance = balance;
    }

    /// Make the next `create_order` fail
    pub fn fail_next_create(&self, failure: ScriptedFailure) {
        self.state().next_create_failure = Some(failure);
    }

    /// Refuse every cancel/close request with `reason`; `None` restores normal behavior
    pub fn refuse_cancels(&self, reason: Option<String>) {
        self.state().refuse_cancels = reason;
    }

    /// Hold every creation reply for `delay` after the order is booked
    pub fn delay_create_replies(&self, delay: Option<Duration>) {
        self.state().reply_delay = delay;
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<PaperRequest> {
        self.state().requests.clone()
    }

    pub fn created(&self) -> Vec<TradeRequest> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                PaperRequest::Create(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tickets for which a cancel or close was requested
    pub fn cancelled_tickets(&self) -> Vec<Ticket> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                PaperRequest::Cancel { ticket, .. } | PaperRequest::Close { ticket, .. } => {
                    Some(*ticket)
                }
                PaperRequest::Create(_) => None,
            })
            .collect()
    }

    /// Deliver a streaming transaction
    pub fn push_event(&self, event: TransactionEvent) {
        self.push_event_result(Ok(event));
    }

    /// Deliver a stream failure (decode error, timeout)
    pub fn push_event_error(&self, error: TerminalError) {
        self.push_event_result(Err(error));
    }

    fn push_event_result(&self, event: EventResult) {
        let guard = self.event_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            if tx.send(event).is_err() {
                debug!("Event stream receiver dropped");
            }
        }
    }

    pub fn push_tick(&self, tick: LiveTick) {
        let guard = self.tick_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            if tx.send(Ok(tick)).is_err() {
                debug!("Tick stream receiver dropped");
            }
        }
    }

    /// Close both streams; pending items are still delivered
    pub fn close_streams(&self) {
        self.event_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.tick_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn book(state: &mut PaperState, request: &TradeRequest) -> TerminalResult<TradeReply> {
        state.requests.push(PaperRequest::Create(request.clone()));
        match state.next_create_failure.take() {
            Some(ScriptedFailure::Refuse(description)) => {
                return Ok(TradeReply::refused(description))
            }
            Some(ScriptedFailure::Timeout) => {
                return Err(TerminalError::Timeout(Duration::from_secs(0)))
            }
            None => {}
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let stoploss = request.stoploss.unwrap_or(0.0);
        let takeprofit = request.takeprofit.unwrap_or(0.0);
        if request.action_type.is_market() {
            state.positions.push(PositionSnapshot {
                id: ticket,
                symbol: request.symbol.clone(),
                position_type: match request.action_type.side() {
                    Side::Buy => PositionType::Buy,
                    Side::Sell => PositionType::Sell,
                },
                volume: request.volume,
                open: request.price.unwrap_or(0.0),
                stoploss,
                takeprofit,
                comment: request.comment,
            });
        } else {
            state.orders.push(OrderSnapshot {
                id: ticket,
                symbol: request.symbol.clone(),
                order_type: request.action_type,
                state: RemoteOrderState::Placed,
                volume: request.volume,
                open: request.price.unwrap_or(0.0),
                stoploss,
                takeprofit,
                comment: request.comment,
            });
        }

        info!(ticket, symbol = %request.symbol, comment = %request.comment, "Paper order created");
        Ok(TradeReply::accepted(ticket))
    }

    fn refuse_cancel(state: &mut PaperState) -> Option<TradeReply> {
        state.refuse_cancels.clone().map(TradeReply::refused)
    }
}

#[async_trait]
impl Terminal for PaperTerminal {
    async fn check_account(&self) -> TerminalResult<()> {
        Ok(())
    }

    async fn create_order(&self, request: &TradeRequest) -> TerminalResult<TradeReply> {
        let (reply, delay) = {
            let mut state = self.state();
            let reply = Self::book(&mut state, request);
            (reply, state.reply_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }

    async fn cancel_order(&self, ticket: Ticket, symbol: &Symbol) -> TerminalResult<TradeReply> {
        let mut state = self.state();
        state.requests.push(PaperRequest::Cancel {
            ticket,
            symbol: symbol.clone(),
        });
        if let Some(reply) = Self::refuse_cancel(&mut state) {
            return Ok(reply);
        }
        state.orders.retain(|o| o.id != ticket);
        Ok(TradeReply::accepted(ticket))
    }

    async fn close_position(
        &self,
        ticket: Ticket,
        symbol: &Symbol,
    ) -> TerminalResult<TradeReply> {
        let mut state = self.state();
        state.requests.push(PaperRequest::Close {
            ticket,
            symbol: symbol.clone(),
        });
        if let Some(reply) = Self::refuse_cancel(&mut state) {
            return Ok(reply);
        }
        state.positions.retain(|p| p.id != ticket);
        Ok(TradeReply::accepted(ticket))
    }

    async fn fetch_positions(&self) -> TerminalResult<Vec<PositionSnapshot>> {
        Ok(self.state().positions.clone())
    }

    async fn fetch_orders(&self) -> TerminalResult<Vec<OrderSnapshot>> {
        Ok(self.state().orders.clone())
    }

    async fn fetch_balance(&self) -> TerminalResult<Balance> {
        Ok(self.state().balance)
    }

    async fn next_event(&self) -> Option<TerminalResult<TransactionEvent>> {
        self.event_rx.lock().await.recv().await
    }

    async fn next_tick(&self) -> Option<TerminalResult<LiveTick>> {
        self.tick_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oms::tags::OrderTags;
    use crate::terminal::protocol::{RemoteOrderType, TransactionType};

    fn request(action_type: RemoteOrderType) -> TradeRequest {
        TradeRequest {
            action_type,
            symbol: Symbol::new("EURUSD"),
            volume: 1.0,
            price: Some(1.1),
            stoploss: None,
            takeprofit: None,
            expiration: 0,
            comment: OrderTags::with_reference(1),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_tickets() {
        let paper = PaperTerminal::new(&PaperConfig::default().with_first_ticket(100));

        let first = paper.create_order(&request(RemoteOrderType::Buy)).await.unwrap();
        let second = paper
            .create_order(&request(RemoteOrderType::SellLimit))
            .await
            .unwrap();

        assert_eq!(first.order, Some(100));
        assert_eq!(second.order, Some(101));
        assert_eq!(paper.fetch_positions().await.unwrap().len(), 1);
        assert_eq!(paper.fetch_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let paper = PaperTerminal::default();

        paper.fail_next_create(ScriptedFailure::Refuse("no money".into()));
        let reply = paper.create_order(&request(RemoteOrderType::Buy)).await.unwrap();
        assert!(reply.error);

        paper.fail_next_create(ScriptedFailure::Timeout);
        assert!(paper.create_order(&request(RemoteOrderType::Buy)).await.is_err());

        let reply = paper.create_order(&request(RemoteOrderType::Buy)).await.unwrap();
        assert!(!reply.error);
        assert_eq!(paper.created().len(), 3);
    }

    #[tokio::test]
    async fn test_event_stream_closes() {
        let paper = PaperTerminal::default();
        paper.push_event(TransactionEvent {
            transaction_type: TransactionType::OrderAdd,
            order: 1,
            position: 0,
            order_state: Some(RemoteOrderState::Started),
            order_type: Some(RemoteOrderType::Buy),
            symbol: Symbol::new("EURUSD"),
            volume: 1.0,
            price: 1.1,
        });
        paper.close_streams();

        assert!(paper.next_event().await.is_some());
        assert!(paper.next_event().await.is_none());
        assert!(paper.next_tick().await.is_none());
    }
}
