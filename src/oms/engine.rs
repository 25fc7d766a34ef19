//! Order lifecycle state machine
//!
//! `OrderEngine` owns every registry and applies lifecycle events to them.
//! It performs no I/O: remote work is expressed as [`Command`]s pushed to an
//! outbox that the broker drains after each call, and everything the owner
//! should see is queued as a [`Notification`] or an alert.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::oms::disambiguate::{attribute_fill, FillTarget};
use crate::oms::gate::{GateOutcome, TransmissionGate};
use crate::oms::groups::{Bracket, BracketRole, GroupTracker};
use crate::oms::position::{Position, PositionLedger};
use crate::oms::registry::OrderRegistry;
use crate::oms::request::OrderRequest;
use crate::oms::tags::OrderTags;
use crate::oms::types::{Fill, Order};
use crate::terminal::protocol::{
    RemoteOrderState, RemoteOrderType, TradeRequest, TransactionEvent, TransactionType,
};
use crate::types::{Balance, OrderId, OrderKind, OrderStatus, Side, Symbol, Ticket, Validity};

/// Transactions held for tickets whose creation reply is still pending
pub const MAX_EARLY_EVENTS: usize = 256;

/// Entry of the owner-drained notification queue
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Snapshot of an order right after it changed
    Order(Order),
    /// Processing boundary marked by the owner
    Boundary,
}

/// Creation request ready for the creation worker
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    /// Local id the returned ticket is bound to (the bracket's primary)
    pub id: OrderId,
    pub remote_type: RemoteOrderType,
    pub request: TradeRequest,
}

/// Remote work requested by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create(CreateRequest),
    Cancel(OrderId),
    RefreshBalance,
}

/// Everything the cancellation worker needs to cancel one order
#[derive(Debug, Clone, PartialEq)]
pub struct CancelTarget {
    pub id: OrderId,
    pub ticket: Ticket,
    pub symbol: Symbol,
    /// Market orders became positions; cancelling them closes the position
    pub close_position: bool,
}

/// Local model of orders, groups and positions
#[derive(Debug)]
pub struct OrderEngine {
    pub(crate) registry: OrderRegistry,
    pub(crate) groups: GroupTracker,
    pub(crate) positions: PositionLedger,
    gate: TransmissionGate,
    notifications: VecDeque<Notification>,
    alerts: VecDeque<BrokerError>,
    outbox: Vec<Command>,
    /// Orders already asked to cancel
    cancel_requested: HashSet<OrderId>,
    /// A position close was sent; the next order-add is the closing deal
    close_requested: bool,
    /// Creation requests sent and not answered yet
    awaiting_ticket: HashSet<OrderId>,
    /// Transactions that arrived before their ticket was assigned
    early_events: VecDeque<TransactionEvent>,
    balance: Balance,
    commission_multiplier: f64,
}

impl Default for OrderEngine {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl OrderEngine {
    pub fn new(commission_multiplier: f64) -> Self {
        Self {
            registry: OrderRegistry::new(),
            groups: GroupTracker::new(),
            positions: PositionLedger::new(),
            gate: TransmissionGate::new(),
            notifications: VecDeque::new(),
            alerts: VecDeque::new(),
            outbox: Vec::new(),
            cancel_requested: HashSet::new(),
            close_requested: false,
            awaiting_ticket: HashSet::new(),
            early_events: VecDeque::new(),
            balance: Balance::default(),
            commission_multiplier,
        }
    }

    // ------------------------------------------------------------------
    // Order entry
    // ------------------------------------------------------------------

    /// Build an order from a `buy`/`sell` call and route it through the gate
    ///
    /// Contract violations are returned before any state changes. A deferred
    /// order is returned without being registered; a transmitting order is
    /// registered together with the rest of its bracket.
    pub fn create_order(&mut self, side: Side, request: OrderRequest) -> BrokerResult<Order> {
        if !request.size.is_finite() || request.size <= 0.0 {
            return Err(BrokerError::InvalidSize(request.size));
        }
        RemoteOrderType::for_order(request.kind, side)?;

        if let Some(parent) = request.parent {
            if !self.gate.is_pending(parent) && !self.registry.contains(parent) {
                return Err(BrokerError::MissingParent(parent));
            }
        }
        if let Some(partner) = request.oco {
            if !self.gate.is_pending(partner) && !self.registry.contains(partner) {
                return Err(BrokerError::UnknownOrder(partner));
            }
        }

        let id = self.registry.next_id();
        let mut order = Order::new(id, request.symbol, side, request.kind, request.size)
            .with_price(if request.kind == OrderKind::Market {
                None
            } else {
                request.price
            })
            .with_parent(request.parent)
            .with_transmit(request.transmit);
        order.price_limit = request.price_limit;
        order.validity = request.validity;
        order.oco = request.oco;
        order.info = request.info;

        let outcome = self.gate.admit(order.clone())?;

        if let Some(partner) = order.oco {
            self.ocoize(id, partner);
        }

        match outcome {
            GateOutcome::Deferred => {
                debug!(id, parent = ?order.parent, "Order deferred until bracket is transmitted");
                Ok(order)
            }
            GateOutcome::Single(order) => {
                let create = Self::creation_request(&order, None, None)?;
                info!(id, symbol = %order.symbol, side = ?order.side, kind = ?order.kind, size = order.size, "Transmitting order");
                self.registry.insert(order.clone());
                self.awaiting_ticket.insert(id);
                self.outbox.push(Command::Create(create));
                Ok(order)
            }
            GateOutcome::Bracket {
                primary,
                stop,
                take_profit,
            } => {
                let create = Self::creation_request(&primary, stop.as_ref(), take_profit.as_ref())?;
                let bracket = Bracket::new(primary.id)
                    .with_stop(stop.as_ref().map(|o| o.id))
                    .with_take_profit(take_profit.as_ref().map(|o| o.id));
                info!(
                    primary = primary.id,
                    stop = ?bracket.stop,
                    take_profit = ?bracket.take_profit,
                    "Transmitting bracket"
                );

                self.groups.insert_bracket(primary.id, bracket);
                self.registry.insert(primary);
                for leg in [stop, take_profit].into_iter().flatten() {
                    self.registry.insert(leg);
                }
                self.awaiting_ticket.insert(create.id);
                self.outbox.push(Command::Create(create));

                self.registry
                    .get(id)
                    .cloned()
                    .ok_or(BrokerError::UnknownOrder(id))
            }
        }
    }

    /// Terminal request for a primary and its protective legs
    fn creation_request(
        primary: &Order,
        stop: Option<&Order>,
        take_profit: Option<&Order>,
    ) -> BrokerResult<CreateRequest> {
        let remote_type = RemoteOrderType::for_order(primary.kind, primary.side)?;

        let stop = stop.filter(|o| o.price.is_some());
        let take_profit = take_profit.filter(|o| o.price.is_some());
        let comment = OrderTags {
            reference: Some(primary.id),
            stop_loss: stop.map(|o| o.id),
            take_profit: take_profit.map(|o| o.id),
            oco: primary.oco,
        };

        let expiration = match primary.validity {
            Validity::Gtc => 0,
            Validity::Until(at) => at.timestamp(),
        };

        Ok(CreateRequest {
            id: primary.id,
            remote_type,
            request: TradeRequest {
                action_type: remote_type,
                symbol: primary.symbol.clone(),
                volume: primary.size,
                price: primary.price,
                stoploss: stop.and_then(|o| o.price),
                takeprofit: take_profit.and_then(|o| o.price),
                expiration,
                comment,
            },
        })
    }

    /// Record the ticket returned for a creation request
    ///
    /// Transactions for `ticket` that arrived before the reply are replayed
    /// in delivery order.
    pub fn bind_ticket(&mut self, id: OrderId, ticket: Ticket, remote_type: RemoteOrderType) {
        debug!(id, ticket, ?remote_type, "Ticket assigned");
        self.registry.bind_ticket(id, ticket, remote_type);

        let (ready, held): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.early_events)
            .into_iter()
            .partition(|e| e.order == ticket || e.position == ticket);
        self.early_events = held;
        self.creation_settled(id);

        for event in ready {
            debug!(id, ticket, state = ?event.order_state, "Replaying early transaction");
            self.apply_transaction(&event);
        }
    }

    /// A creation request failed; the order and its bracket unwind
    pub fn creation_failed(&mut self, id: OrderId, error: BrokerError) {
        self.creation_settled(id);
        self.alert(error);
        self.reject(id);
    }

    fn creation_settled(&mut self, id: OrderId) {
        self.awaiting_ticket.remove(&id);
        if self.awaiting_ticket.is_empty() && !self.early_events.is_empty() {
            debug!(count = self.early_events.len(), "Dropping transactions for foreign tickets");
            self.early_events.clear();
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    pub fn submit(&mut self, id: OrderId) {
        let Some(order) = self.registry.get_mut(id) else {
            self.alert(BrokerError::UnknownOrder(id));
            return;
        };
        if order.status != OrderStatus::Created {
            return;
        }
        order.set_status(OrderStatus::Submitted);
        self.notify(id);

        for member in self.bracket_members(id) {
            if member != id {
                self.submit(member);
            }
        }
    }

    pub fn accept(&mut self, id: OrderId) {
        let Some(order) = self.registry.get_mut(id) else {
            self.alert(BrokerError::UnknownOrder(id));
            return;
        };
        if !matches!(
            order.status,
            OrderStatus::Created | OrderStatus::Submitted | OrderStatus::Partial
        ) {
            return;
        }
        order.set_status(OrderStatus::Accepted);
        self.notify(id);

        for member in self.bracket_members(id) {
            if member != id {
                self.accept(member);
            }
        }
    }

    pub fn reject(&mut self, id: OrderId) {
        self.finish(id, OrderStatus::Rejected);
    }

    pub fn cancel(&mut self, id: OrderId) {
        self.finish(id, OrderStatus::Canceled);
    }

    pub fn expire(&mut self, id: OrderId) {
        self.finish(id, OrderStatus::Expired);
    }

    /// Move a live order to a non-fill terminal status and unwind its groups
    fn finish(&mut self, id: OrderId, status: OrderStatus) {
        let Some(order) = self.registry.get_mut(id) else {
            self.alert(BrokerError::UnknownOrder(id));
            return;
        };
        if !order.is_alive() {
            return;
        }
        order.set_status(status);
        info!(id, %status, "Order finished");
        self.notify(id);
        self.bracketize(id, true);
        self.ococheck(id);
    }

    /// Apply a fill reported for `id`
    ///
    /// When `id` is no longer alive the fill belongs to one of its bracket's
    /// protective legs. A final fill executes whatever is left of the target.
    pub fn fill(&mut self, id: OrderId, size: f64, price: f64, is_final: bool) {
        if size == 0.0 && !is_final {
            return;
        }
        let Some(order) = self.registry.get(id) else {
            self.alert(BrokerError::UnknownOrder(id));
            return;
        };

        let target = if order.is_alive() {
            Some(id)
        } else {
            self.bracket_fill_target(order, price)
        };
        let Some(target) = target else {
            self.alert(BrokerError::UnmatchedFill { id, price, size });
            return;
        };

        let size = match (is_final, self.registry.get(target)) {
            (true, Some(order)) => order.executed.remaining,
            _ => size,
        };
        debug!(id, target, size, price, is_final, "Applying fill");
        self.execute(target, size, price, true);
    }

    /// Leg of the bracket around a dead order that a fill at `price` hit
    fn bracket_fill_target(&self, order: &Order, price: f64) -> Option<OrderId> {
        let bracket = self.groups.bracket(order.bracket_key())?;
        let origin = if order.parent.is_some() {
            order.side.opposite()
        } else {
            order.side
        };

        let target = match (bracket.stop, bracket.take_profit) {
            (Some(stop), Some(take_profit)) => {
                let limit = self.registry.get(take_profit)?.price?;
                match attribute_fill(origin, limit, price) {
                    FillTarget::Stop => stop,
                    FillTarget::TakeProfit => take_profit,
                }
            }
            (Some(leg), None) | (None, Some(leg)) => leg,
            (None, None) => return None,
        };
        self.registry.is_alive(target).then_some(target)
    }

    /// Execute `size` at `price` on a live order
    ///
    /// `touch_ledger = false` completes an order whose exposure is already in
    /// the ledger (positions rebuilt from a snapshot).
    pub(crate) fn execute(&mut self, id: OrderId, size: f64, price: f64, touch_ledger: bool) {
        let multiplier = self.commission_multiplier;
        let Some(order) = self.registry.get_mut(id) else {
            return;
        };

        let fill = if touch_ledger {
            let update = self.positions.update(&order.symbol, size, price);
            Fill {
                size,
                price,
                opened: update.opened,
                closed: update.closed,
                pnl: update.realized_pnl,
                timestamp: Utc::now(),
            }
        } else {
            Fill {
                size,
                price,
                opened: size,
                closed: 0.0,
                pnl: 0.0,
                timestamp: Utc::now(),
            }
        };
        let value = size.abs() * price * multiplier;

        let completed = order.execute(fill, value, 0.0);
        if completed {
            info!(id, symbol = %order.symbol, price = order.executed.price, size = order.executed.size, "Order completed");
        }
        self.notify(id);

        if completed {
            self.bracketize(id, false);
            self.ococheck(id);
            self.outbox.push(Command::RefreshBalance);
        }
    }

    /// Fill that belongs to no local order
    ///
    /// The terminal opens a closing deal when a position is closed by ticket;
    /// it is recorded as a completed simulated market order.
    pub fn fill_external(&mut self, symbol: &Symbol, size: f64, price: f64) {
        if size == 0.0 {
            return;
        }
        let id = self.registry.next_id();
        let side = if size > 0.0 { Side::Buy } else { Side::Sell };
        let order = Order::new(id, symbol.clone(), side, OrderKind::Market, size)
            .with_price(Some(price))
            .simulated();
        info!(id, %symbol, size, price, "External fill");

        self.registry.insert(order);
        self.execute(id, size, price, true);
    }

    // ------------------------------------------------------------------
    // Group resolution
    // ------------------------------------------------------------------

    fn bracket_members(&self, key: OrderId) -> Vec<OrderId> {
        self.groups
            .bracket(key)
            .map(Bracket::members)
            .unwrap_or_default()
    }

    /// Resolve the bracket that `id` belongs to after it filled or died
    pub fn bracketize(&mut self, id: OrderId, cancel: bool) {
        let Some(key) = self.registry.get(id).map(Order::bracket_key) else {
            return;
        };
        let Some(mut bracket) = self.groups.take_bracket(key) else {
            return;
        };

        if cancel {
            for member in bracket.members() {
                if member != id && self.registry.is_alive(member) {
                    self.cancel(member);
                }
            }
            return;
        }

        match bracket.role_of(id) {
            Some(BracketRole::Primary) => {
                bracket.primary = None;
                for leg in bracket.legs() {
                    if let Some(order) = self.registry.get_mut(leg) {
                        order.active = true;
                    }
                }
                if !bracket.is_empty() {
                    debug!(key, legs = ?bracket.legs(), "Primary filled, protective legs active");
                    self.groups.insert_bracket(key, bracket);
                }
            }
            Some(BracketRole::Stop | BracketRole::TakeProfit) => {
                if let Some(other) = bracket.other_leg(id) {
                    if self.registry.is_alive(other) {
                        self.cancel(other);
                    }
                }
            }
            None => {}
        }
    }

    /// Register `id` in the OCO group of `partner`
    pub fn ocoize(&mut self, id: OrderId, partner: OrderId) {
        self.groups.ocoize(id, partner);
    }

    /// Resolve the OCO group of a finished order
    pub fn ococheck(&mut self, id: OrderId) {
        if self.registry.is_alive(id) {
            self.alert(BrokerError::OcoOnLiveOrder(id));
            return;
        }
        for member in self.groups.take_oco_group(id) {
            if member != id {
                self.request_cancel(member);
            }
        }
    }

    /// Ask the terminal to cancel `id`, at most once per order
    pub fn request_cancel(&mut self, id: OrderId) {
        if !self.registry.is_alive(id) {
            debug!(id, "Cancel ignored for unknown or finished order");
            return;
        }
        if !self.cancel_requested.insert(id) {
            debug!(id, "Cancel already in flight");
            return;
        }
        self.outbox.push(Command::Cancel(id));
    }

    /// Ticket, symbol and method needed to cancel `id` remotely
    pub fn cancel_target(&self, id: OrderId) -> Option<CancelTarget> {
        let order = self.registry.get(id)?;
        let ticket = self.registry.ticket(id)?;
        let close_position = self
            .registry
            .remote_type(id)
            .is_some_and(RemoteOrderType::is_market);
        Some(CancelTarget {
            id,
            ticket,
            symbol: order.symbol.clone(),
            close_position,
        })
    }

    /// A cancel or close was accepted by the terminal
    pub fn cancel_sent(&mut self, target: &CancelTarget) {
        if target.close_position {
            self.close_requested = true;
        }
    }

    // ------------------------------------------------------------------
    // Remote events
    // ------------------------------------------------------------------

    /// Route a streaming transaction to the order it concerns
    pub fn apply_transaction(&mut self, event: &TransactionEvent) {
        if let Some(id) = self.mapped(event.order) {
            self.apply_to(id, event);
            return;
        }

        if let Some(id) = self.mapped(event.position) {
            if event.order_state == Some(RemoteOrderState::Filled) {
                self.apply_to(id, event);
            }
            return;
        }

        if self.close_requested && event.transaction_type == TransactionType::OrderAdd {
            self.close_requested = false;
            self.fill_external(&event.symbol, event.signed_volume(), event.price);
            return;
        }

        // The creation reply may still be on its way
        if !self.awaiting_ticket.is_empty() && (event.order != 0 || event.position != 0) {
            if self.early_events.len() >= MAX_EARLY_EVENTS {
                if let Some(dropped) = self.early_events.pop_front() {
                    warn!(order = dropped.order, position = dropped.position, "Early transaction buffer full, dropping oldest");
                }
            }
            debug!(order = event.order, position = event.position, "Transaction held until its ticket is assigned");
            self.early_events.push_back(event.clone());
            return;
        }

        debug!(order = event.order, position = event.position, "Transaction for unknown ticket ignored");
    }

    fn mapped(&self, ticket: Ticket) -> Option<OrderId> {
        if ticket == 0 {
            return None;
        }
        self.registry.local_id(ticket)
    }

    fn apply_to(&mut self, id: OrderId, event: &TransactionEvent) {
        if let Some(state) = event.order_state {
            self.process_order(id, state, event.signed_volume(), event.price);
        }
    }

    /// Apply a remote order state to `id`
    pub fn process_order(&mut self, id: OrderId, state: RemoteOrderState, size: f64, price: f64) {
        match state {
            RemoteOrderState::Started => self.submit(id),
            RemoteOrderState::Placed => self.accept(id),
            RemoteOrderState::Canceled => self.cancel(id),
            RemoteOrderState::Partial => self.fill(id, size, price, false),
            RemoteOrderState::Filled => self.fill(id, size, price, true),
            RemoteOrderState::Rejected => self.reject(id),
            RemoteOrderState::Expired => self.expire(id),
            other => debug!(id, state = ?other, "Remote state ignored"),
        }
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    fn notify(&mut self, id: OrderId) {
        if let Some(order) = self.registry.get(id) {
            self.notifications.push_back(Notification::Order(order.clone()));
        }
    }

    pub fn alert(&mut self, error: BrokerError) {
        warn!(%error, "Broker alert");
        self.alerts.push_back(error);
    }

    pub fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    pub fn mark_boundary(&mut self) {
        self.notifications.push_back(Notification::Boundary);
    }

    pub fn take_alerts(&mut self) -> Vec<BrokerError> {
        self.alerts.drain(..).collect()
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.registry.get(id).or_else(|| self.gate.pending(id))
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.registry.iter()
    }

    pub fn ticket(&self, id: OrderId) -> Option<Ticket> {
        self.registry.ticket(id)
    }

    pub fn position(&self, symbol: &Symbol) -> Position {
        self.positions.get(symbol)
    }

    pub fn open_positions(&self) -> Vec<(Symbol, Position)> {
        let mut positions: Vec<_> = self
            .positions
            .open_positions()
            .map(|(s, p)| (s.clone(), *p))
            .collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        positions
    }

    pub fn bracket(&self, key: OrderId) -> Option<&Bracket> {
        self.groups.bracket(key)
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn set_balance(&mut self, balance: Balance) {
        self.balance = balance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn symbol() -> Symbol {
        Symbol::new("EURUSD")
    }

    fn statuses(engine: &mut OrderEngine) -> Vec<(OrderId, OrderStatus)> {
        std::iter::from_fn(|| engine.next_notification())
            .filter_map(|n| match n {
                Notification::Order(o) => Some((o.id, o.status)),
                Notification::Boundary => None,
            })
            .collect()
    }

    fn cancels(engine: &mut OrderEngine) -> Vec<OrderId> {
        engine
            .take_commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Cancel(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Long market entry with stop 90 and take-profit 110
    fn long_bracket(engine: &mut OrderEngine) -> (OrderId, OrderId, OrderId) {
        let primary = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0).with_transmit(false))
            .unwrap();
        let stop = engine
            .create_order(
                Side::Sell,
                OrderRequest::stop(symbol(), 1.0, 90.0)
                    .with_parent(primary.id)
                    .with_transmit(false),
            )
            .unwrap();
        let take_profit = engine
            .create_order(
                Side::Sell,
                OrderRequest::limit(symbol(), 1.0, 110.0).with_parent(primary.id),
            )
            .unwrap();
        (primary.id, stop.id, take_profit.id)
    }

    #[test]
    fn test_single_order_emits_create() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Sell, OrderRequest::limit(symbol(), 2.0, 1.2))
            .unwrap();

        let commands = engine.take_commands();
        assert_eq!(commands.len(), 1);
        let Command::Create(create) = &commands[0] else {
            panic!("expected create, got {:?}", commands[0]);
        };
        assert_eq!(create.id, order.id);
        assert_eq!(create.request.action_type, RemoteOrderType::SellLimit);
        assert_eq!(create.request.price, Some(1.2));
        assert_eq!(create.request.expiration, 0);
        assert_eq!(create.request.comment.reference, Some(order.id));
    }

    #[test]
    fn test_contract_violations_are_rejected() {
        let mut engine = OrderEngine::default();

        let err = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 0.0))
            .unwrap_err();
        assert_eq!(err, BrokerError::InvalidSize(0.0));

        let err = engine
            .create_order(Side::Buy, OrderRequest::stop_limit(symbol(), 1.0, 1.0, 1.1))
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnsupportedOrderType { .. }));

        let err = engine
            .create_order(Side::Sell, OrderRequest::stop(symbol(), 1.0, 1.0).with_parent(42))
            .unwrap_err();
        assert_eq!(err, BrokerError::MissingParent(42));

        assert!(engine.take_commands().is_empty());
        assert_eq!(engine.orders().count(), 0);
    }

    #[test]
    fn test_bracket_transmitted_once() {
        let mut engine = OrderEngine::default();
        let (primary, stop, take_profit) = long_bracket(&mut engine);

        let commands = engine.take_commands();
        assert_eq!(commands.len(), 1);
        let Command::Create(create) = &commands[0] else {
            panic!("expected create");
        };
        assert_eq!(create.id, primary);
        assert_eq!(create.request.stoploss, Some(90.0));
        assert_eq!(create.request.takeprofit, Some(110.0));
        assert_eq!(create.request.comment.stop_loss, Some(stop));
        assert_eq!(create.request.comment.take_profit, Some(take_profit));

        let bracket = engine.bracket(primary).unwrap();
        assert_eq!(bracket.members(), vec![primary, stop, take_profit]);
        assert!(!engine.order(stop).unwrap().active);
    }

    #[test]
    fn test_leg_transmitted_after_bracket_is_rejected() {
        let mut engine = OrderEngine::default();
        let (primary, _, _) = long_bracket(&mut engine);

        let err = engine
            .create_order(
                Side::Sell,
                OrderRequest::limit(symbol(), 1.0, 120.0).with_parent(primary),
            )
            .unwrap_err();
        assert_eq!(err, BrokerError::MissingPendingBracket(primary));
    }

    #[test]
    fn test_submit_is_idempotent_and_recurses() {
        let mut engine = OrderEngine::default();
        let (primary, stop, take_profit) = long_bracket(&mut engine);

        engine.submit(primary);
        engine.submit(primary);

        assert_eq!(
            statuses(&mut engine),
            vec![
                (primary, OrderStatus::Submitted),
                (stop, OrderStatus::Submitted),
                (take_profit, OrderStatus::Submitted),
            ]
        );
    }

    #[test]
    fn test_accept_from_partial() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 10.0, 100.0))
            .unwrap();
        engine.submit(order.id);
        engine.accept(order.id);
        engine.fill(order.id, 4.0, 100.0, false);
        engine.accept(order.id);
        engine.accept(order.id);

        assert_eq!(
            statuses(&mut engine),
            vec![
                (order.id, OrderStatus::Submitted),
                (order.id, OrderStatus::Accepted),
                (order.id, OrderStatus::Partial),
                (order.id, OrderStatus::Accepted),
            ]
        );
    }

    #[test]
    fn test_terminal_orders_never_change() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 1.0, 100.0))
            .unwrap();
        engine.cancel(order.id);
        engine.accept(order.id);
        engine.reject(order.id);
        engine.expire(order.id);
        engine.submit(order.id);

        assert_eq!(engine.order(order.id).unwrap().status, OrderStatus::Canceled);
        assert_eq!(statuses(&mut engine), vec![(order.id, OrderStatus::Canceled)]);
    }

    #[test]
    fn test_primary_fill_activates_legs() {
        let mut engine = OrderEngine::default();
        let (primary, stop, take_profit) = long_bracket(&mut engine);
        engine.take_commands();

        engine.fill(primary, 1.0, 100.0, true);

        assert_eq!(engine.order(primary).unwrap().status, OrderStatus::Completed);
        let bracket = engine.bracket(primary).unwrap();
        assert_eq!(bracket.members(), vec![stop, take_profit]);
        assert!(engine.order(stop).unwrap().active);
        assert!(engine.order(take_profit).unwrap().active);
        assert_eq!(engine.position(&symbol()).size, 1.0);
        assert_eq!(engine.take_commands(), vec![Command::RefreshBalance]);
    }

    #[test]
    fn test_take_profit_fill_via_primary_cancels_stop() {
        let mut engine = OrderEngine::default();
        let (primary, stop, take_profit) = long_bracket(&mut engine);
        engine.fill(primary, 1.0, 100.0, true);

        engine.fill(primary, -1.0, 111.0, true);

        assert_eq!(engine.order(take_profit).unwrap().status, OrderStatus::Completed);
        assert_eq!(engine.order(stop).unwrap().status, OrderStatus::Canceled);
        assert!(engine.bracket(primary).is_none());
        assert!(engine.position(&symbol()).is_flat());
        assert_relative_eq!(engine.order(take_profit).unwrap().executed.pnl, 11.0);
    }

    #[test]
    fn test_stop_fill_via_primary_cancels_take_profit() {
        let mut engine = OrderEngine::default();
        let (primary, stop, take_profit) = long_bracket(&mut engine);
        engine.fill(primary, 1.0, 100.0, true);

        engine.fill(primary, -1.0, 85.0, true);

        assert_eq!(engine.order(stop).unwrap().status, OrderStatus::Completed);
        assert_eq!(engine.order(take_profit).unwrap().status, OrderStatus::Canceled);
    }

    #[test]
    fn test_cancelled_primary_cancels_legs_locally() {
        let mut engine = OrderEngine::default();
        let (primary, stop, take_profit) = long_bracket(&mut engine);
        engine.take_commands();

        engine.cancel(primary);

        assert_eq!(engine.order(stop).unwrap().status, OrderStatus::Canceled);
        assert_eq!(engine.order(take_profit).unwrap().status, OrderStatus::Canceled);
        assert!(engine.bracket(primary).is_none());
        assert!(cancels(&mut engine).is_empty());
    }

    #[test]
    fn test_fill_on_dead_order_without_bracket_alerts() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();
        engine.fill(order.id, 1.0, 100.0, true);
        engine.fill(order.id, 1.0, 100.0, true);

        let alerts = engine.take_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(alerts[0], BrokerError::UnmatchedFill { .. }));
        assert_eq!(engine.position(&symbol()).size, 1.0);
    }

    #[test]
    fn test_final_fill_executes_remaining() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Sell, OrderRequest::limit(symbol(), 10.0, 100.0))
            .unwrap();
        engine.fill(order.id, -4.0, 100.0, false);
        engine.fill(order.id, -10.0, 101.0, true);

        let order = engine.order(order.id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_relative_eq!(order.executed.size, -10.0);
        assert_relative_eq!(engine.position(&symbol()).size, -10.0);
    }

    #[test]
    fn test_zero_partial_fill_ignored() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 1.0, 100.0))
            .unwrap();
        engine.fill(order.id, 0.0, 100.0, false);
        assert!(statuses(&mut engine).is_empty());
    }

    #[test]
    fn test_oco_group_cancels_siblings_once() {
        let mut engine = OrderEngine::default();
        let a = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 1.0, 90.0))
            .unwrap();
        let b = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 1.0, 95.0).with_oco(a.id))
            .unwrap();
        let c = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 1.0, 99.0).with_oco(a.id))
            .unwrap();
        engine.take_commands();

        engine.fill(b.id, 1.0, 95.0, true);
        let mut first = cancels(&mut engine);
        first.sort();
        assert_eq!(first, vec![a.id, c.id]);

        // Racing terminal events for the siblings
        engine.cancel(a.id);
        engine.cancel(c.id);
        engine.request_cancel(a.id);
        assert!(cancels(&mut engine).is_empty());
    }

    #[test]
    fn test_ococheck_on_live_order_alerts() {
        let mut engine = OrderEngine::default();
        let a = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 1.0, 90.0))
            .unwrap();
        engine.ococheck(a.id);
        assert_eq!(engine.take_alerts(), vec![BrokerError::OcoOnLiveOrder(a.id)]);
    }

    #[test]
    fn test_partial_fill_does_not_resolve_oco() {
        let mut engine = OrderEngine::default();
        let a = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 2.0, 90.0))
            .unwrap();
        let _b = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 2.0, 95.0).with_oco(a.id))
            .unwrap();
        engine.take_commands();

        engine.fill(a.id, 1.0, 90.0, false);
        assert!(engine.take_commands().is_empty());
        assert!(engine.take_alerts().is_empty());
    }

    #[test]
    fn test_request_cancel_filters() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::limit(symbol(), 1.0, 90.0))
            .unwrap();
        engine.take_commands();

        engine.request_cancel(999);
        engine.request_cancel(order.id);
        engine.request_cancel(order.id);
        assert_eq!(engine.take_commands(), vec![Command::Cancel(order.id)]);
    }

    #[test]
    fn test_transactions_routed_by_ticket() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Sell, OrderRequest::market(symbol(), 1.0))
            .unwrap();
        engine.bind_ticket(order.id, 500, RemoteOrderType::Sell);

        let event = |state, transaction_type| TransactionEvent {
            transaction_type,
            order: 500,
            position: 0,
            order_state: Some(state),
            order_type: Some(RemoteOrderType::Sell),
            symbol: symbol(),
            volume: 1.0,
            price: 1.1,
        };
        engine.apply_transaction(&event(RemoteOrderState::Started, TransactionType::OrderAdd));
        engine.apply_transaction(&event(RemoteOrderState::Filled, TransactionType::OrderUpdate));

        assert_eq!(
            statuses(&mut engine),
            vec![
                (order.id, OrderStatus::Submitted),
                (order.id, OrderStatus::Completed),
            ]
        );
        assert_eq!(engine.position(&symbol()).size, -1.0);
    }

    fn market_event(ticket: Ticket, state: RemoteOrderState, price: f64) -> TransactionEvent {
        TransactionEvent {
            transaction_type: TransactionType::OrderUpdate,
            order: ticket,
            position: 0,
            order_state: Some(state),
            order_type: Some(RemoteOrderType::Buy),
            symbol: symbol(),
            volume: 1.0,
            price,
        }
    }

    #[test]
    fn test_events_before_ticket_are_replayed() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();
        engine.take_commands();

        engine.apply_transaction(&market_event(500, RemoteOrderState::Started, 0.0));
        engine.apply_transaction(&market_event(500, RemoteOrderState::Filled, 1.1));
        assert_eq!(engine.order(order.id).unwrap().status, OrderStatus::Created);

        engine.bind_ticket(order.id, 500, RemoteOrderType::Buy);

        assert_eq!(
            statuses(&mut engine),
            vec![
                (order.id, OrderStatus::Submitted),
                (order.id, OrderStatus::Completed),
            ]
        );
        assert_relative_eq!(engine.position(&symbol()).size, 1.0);
        assert_relative_eq!(engine.position(&symbol()).price, 1.1);
    }

    #[test]
    fn test_early_events_kept_for_their_own_ticket() {
        let mut engine = OrderEngine::default();
        let first = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();
        let second = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();

        engine.apply_transaction(&market_event(601, RemoteOrderState::Started, 0.0));
        engine.bind_ticket(first.id, 600, RemoteOrderType::Buy);
        assert_eq!(engine.order(second.id).unwrap().status, OrderStatus::Created);

        engine.bind_ticket(second.id, 601, RemoteOrderType::Buy);
        assert_eq!(engine.order(second.id).unwrap().status, OrderStatus::Submitted);
        assert_eq!(engine.order(first.id).unwrap().status, OrderStatus::Created);
    }

    #[test]
    fn test_foreign_events_dropped_when_no_creation_pending() {
        let mut engine = OrderEngine::default();
        engine.apply_transaction(&market_event(800, RemoteOrderState::Filled, 1.1));

        let order = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();
        engine.apply_transaction(&market_event(801, RemoteOrderState::Started, 0.0));
        engine.bind_ticket(order.id, 802, RemoteOrderType::Buy);

        // A later order that happens to get ticket 800 or 801 sees nothing stale
        let late = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();
        engine.bind_ticket(late.id, 801, RemoteOrderType::Buy);
        assert_eq!(engine.order(late.id).unwrap().status, OrderStatus::Created);
        assert!(engine.position(&symbol()).is_flat());
    }

    #[test]
    fn test_early_event_buffer_is_bounded() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();

        engine.apply_transaction(&market_event(900, RemoteOrderState::Started, 0.0));
        for ticket in 0..MAX_EARLY_EVENTS as Ticket {
            engine.apply_transaction(&market_event(10_000 + ticket, RemoteOrderState::Placed, 0.0));
        }
        engine.bind_ticket(order.id, 900, RemoteOrderType::Buy);

        // The oldest held transaction was evicted
        assert_eq!(engine.order(order.id).unwrap().status, OrderStatus::Created);
    }

    #[test]
    fn test_external_fill_after_close() {
        let mut engine = OrderEngine::default();
        let order = engine
            .create_order(Side::Buy, OrderRequest::market(symbol(), 1.0))
            .unwrap();
        engine.bind_ticket(order.id, 700, RemoteOrderType::Buy);
        engine.fill(order.id, 1.0, 100.0, true);

        let target = CancelTarget {
            id: order.id,
            ticket: 700,
            symbol: symbol(),
            close_position: true,
        };
        engine.cancel_sent(&target);
        engine.apply_transaction(&TransactionEvent {
            transaction_type: TransactionType::OrderAdd,
            order: 701,
            position: 0,
            order_state: Some(RemoteOrderState::Started),
            order_type: Some(RemoteOrderType::Sell),
            symbol: symbol(),
            volume: 1.0,
            price: 105.0,
        });

        assert!(engine.position(&symbol()).is_flat());
        let external = engine.orders().last().unwrap();
        assert!(external.simulated);
        assert_eq!(external.status, OrderStatus::Completed);
        assert_relative_eq!(external.executed.pnl, 5.0);
    }

    #[test]
    fn test_creation_failure_unwinds_bracket() {
        let mut engine = OrderEngine::default();
        let (primary, stop, take_profit) = long_bracket(&mut engine);

        engine.creation_failed(
            primary,
            BrokerError::Protocol {
                id: primary,
                description: "no money".into(),
            },
        );

        for id in [primary, stop, take_profit] {
            assert!(!engine.order(id).unwrap().is_alive());
        }
        assert_eq!(engine.order(primary).unwrap().status, OrderStatus::Rejected);
        assert_eq!(engine.take_alerts().len(), 1);
    }

    #[test]
    fn test_boundary_marks() {
        let mut engine = OrderEngine::default();
        engine.mark_boundary();
        assert_eq!(engine.next_notification(), Some(Notification::Boundary));
        assert_eq!(engine.next_notification(), None);
    }
}
