//! Rebuild the local model from a terminal snapshot
//!
//! Runs at startup and on every reconnect, before live events are applied.
//! Open positions become completed primaries with their protective legs;
//! working orders become live primaries. Identifiers are recovered from the
//! comment tags so brackets and OCO links survive a restart.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::oms::groups::Bracket;
use crate::oms::tags::OrderTags;
use crate::oms::types::Order;
use crate::oms::OrderEngine;
use crate::terminal::protocol::{OrderSnapshot, PositionSnapshot, RemoteOrderType};
use crate::types::{OrderId, OrderKind, Side, Symbol, Ticket};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Positions listed by the terminal
    pub positions: usize,
    /// Orders listed by the terminal
    pub orders: usize,
    /// Local orders created from the snapshot (primaries and legs)
    pub synthesized: Vec<OrderId>,
    /// Known local orders updated from the snapshot
    pub refreshed: Vec<OrderId>,
    /// Alive local orders whose ticket the terminal no longer lists
    pub missing: Vec<OrderId>,
    /// Snapshot orders skipped because they are no longer working
    pub skipped: usize,
}

/// Remote row being rebuilt, either a position or a working order
struct Remote<'a> {
    ticket: Ticket,
    symbol: &'a Symbol,
    side: Side,
    kind: OrderKind,
    remote_type: RemoteOrderType,
    volume: f64,
    price: f64,
    stoploss: f64,
    takeprofit: f64,
    tags: OrderTags,
}

impl<'a> From<&'a PositionSnapshot> for Remote<'a> {
    fn from(p: &'a PositionSnapshot) -> Self {
        let side = p.side();
        Self {
            ticket: p.id,
            symbol: &p.symbol,
            side,
            kind: OrderKind::Market,
            remote_type: match side {
                Side::Buy => RemoteOrderType::Buy,
                Side::Sell => RemoteOrderType::Sell,
            },
            volume: p.volume,
            price: p.open,
            stoploss: p.stoploss,
            takeprofit: p.takeprofit,
            tags: p.comment,
        }
    }
}

impl<'a> From<&'a OrderSnapshot> for Remote<'a> {
    fn from(o: &'a OrderSnapshot) -> Self {
        Self {
            ticket: o.id,
            symbol: &o.symbol,
            side: o.order_type.side(),
            kind: o.order_type.kind(),
            remote_type: o.order_type,
            volume: o.volume,
            price: o.open,
            stoploss: o.stoploss,
            takeprofit: o.takeprofit,
            tags: o.comment,
        }
    }
}

impl OrderEngine {
    /// Replay a terminal snapshot into the registries
    ///
    /// The position ledger is reset to the snapshot. Tickets that are already
    /// mapped are refreshed instead of synthesized again.
    pub fn reconcile(
        &mut self,
        positions: &[PositionSnapshot],
        orders: &[OrderSnapshot],
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            positions: positions.len(),
            orders: orders.len(),
            ..ReconcileReport::default()
        };
        let mut seen: HashSet<Ticket> = HashSet::new();

        self.positions.clear();
        for position in positions {
            self.positions
                .merge(&position.symbol, position.signed_volume(), position.open);
        }

        for position in positions {
            seen.insert(position.id);

            if let Some(id) = self.registry.local_id(position.id) {
                if let Some(remaining) = self
                    .registry
                    .get(id)
                    .filter(|o| o.is_alive())
                    .map(|o| o.executed.remaining)
                {
                    // Filled while disconnected; exposure is already in the ledger
                    self.execute(id, remaining, position.open, false);
                }
                report.refreshed.push(id);
                continue;
            }

            let remote = Remote::from(position);
            let primary = self.rebuild_bracket(&remote, &mut report);
            self.submit(primary);
            self.execute(primary, remote.side.sign() * remote.volume, remote.price, false);
        }

        for snapshot in orders {
            seen.insert(snapshot.id);

            if !snapshot.state.is_working() {
                report.skipped += 1;
                continue;
            }

            if let Some(id) = self.registry.local_id(snapshot.id) {
                let size = snapshot.order_type.side().sign() * snapshot.volume;
                self.process_order(id, snapshot.state, size, snapshot.open);
                report.refreshed.push(id);
                continue;
            }

            let remote = Remote::from(snapshot);
            let primary = self.rebuild_bracket(&remote, &mut report);

            if let Some(tag) = remote.tags.oco {
                match self.registry.resolve_tag(tag) {
                    Some(partner) => {
                        if let Some(order) = self.registry.get_mut(primary) {
                            order.oco = Some(partner);
                        }
                        self.ocoize(primary, partner);
                        if !self.registry.is_alive(partner) {
                            self.ococheck(partner);
                        }
                    }
                    None => {
                        // Partner is gone, so this side must go too
                        self.request_cancel(primary);
                    }
                }
            }

            self.submit(primary);
        }

        report.missing = self
            .registry
            .iter()
            .filter(|o| o.is_alive())
            .filter_map(|o| Some((o.id, self.registry.ticket(o.id)?)))
            .filter(|(_, ticket)| !seen.contains(ticket))
            .map(|(id, _)| id)
            .collect();
        self.sweep_orphaned_legs(&seen, &mut report);
        for id in &report.missing {
            warn!(id, "Order not found on terminal");
        }

        info!(
            positions = report.positions,
            orders = report.orders,
            synthesized = report.synthesized.len(),
            refreshed = report.refreshed.len(),
            missing = report.missing.len(),
            "Reconciliation complete"
        );
        report
    }

    /// Protective legs live on their primary's ticket and vanish with it
    ///
    /// Legs of a bracket whose primary ticket is no longer listed are
    /// reported missing. When the primary already filled, its position is
    /// gone and the legs are canceled; a pending primary is left alone like
    /// any other missing order.
    fn sweep_orphaned_legs(&mut self, seen: &HashSet<Ticket>, report: &mut ReconcileReport) {
        let mut orphaned: Vec<(OrderId, Vec<OrderId>)> = self
            .groups
            .brackets()
            .filter(|(key, _)| {
                self.registry
                    .ticket(*key)
                    .is_some_and(|ticket| !seen.contains(&ticket))
            })
            .map(|(key, bracket)| (key, bracket.legs()))
            .collect();
        orphaned.sort_by_key(|(key, _)| *key);

        for (key, legs) in orphaned {
            let legs: Vec<OrderId> = legs
                .into_iter()
                .filter(|leg| self.registry.is_alive(*leg))
                .collect();
            report.missing.extend(&legs);

            if !self.registry.is_alive(key) {
                for leg in legs {
                    self.cancel(leg);
                }
            }
        }
        report.missing.sort_unstable();
        report.missing.dedup();
    }

    /// Register a simulated primary and its protective legs
    fn rebuild_bracket(&mut self, remote: &Remote<'_>, report: &mut ReconcileReport) -> OrderId {
        let has_stop = remote.stoploss > 0.0;
        let has_take_profit = remote.takeprofit > 0.0;

        let primary_id = self.registry.adopt_id(remote.tags.reference);
        let primary = Order::new(
            primary_id,
            remote.symbol.clone(),
            remote.side,
            remote.kind,
            remote.volume,
        )
        .with_price(Some(remote.price))
        .with_transmit(!has_stop && !has_take_profit)
        .simulated();
        self.registry.insert(primary);
        self.registry
            .bind_ticket(primary_id, remote.ticket, remote.remote_type);
        report.synthesized.push(primary_id);

        let mut bracket = Bracket::new(primary_id);

        if has_stop {
            let id = self.registry.adopt_id(remote.tags.stop_loss);
            let leg = Order::new(
                id,
                remote.symbol.clone(),
                remote.side.opposite(),
                OrderKind::Stop,
                remote.volume,
            )
            .with_price(Some(remote.stoploss))
            .with_parent(Some(primary_id))
            .with_transmit(!has_take_profit)
            .simulated();
            self.registry.insert(leg);
            report.synthesized.push(id);
            bracket.stop = Some(id);
        }

        if has_take_profit {
            let id = self.registry.adopt_id(remote.tags.take_profit);
            let leg = Order::new(
                id,
                remote.symbol.clone(),
                remote.side.opposite(),
                OrderKind::Limit,
                remote.volume,
            )
            .with_price(Some(remote.takeprofit))
            .with_parent(Some(primary_id))
            .simulated();
            self.registry.insert(leg);
            report.synthesized.push(id);
            bracket.take_profit = Some(id);
        }

        self.groups.insert_bracket(primary_id, bracket);
        primary_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oms::{Command, OrderRequest};
    use crate::terminal::protocol::{PositionType, RemoteOrderState};
    use crate::types::OrderStatus;
    use approx::assert_relative_eq;

    fn position(id: Ticket, volume: f64, sl: f64, tp: f64, comment: &str) -> PositionSnapshot {
        PositionSnapshot {
            id,
            symbol: Symbol::new("EURUSD"),
            position_type: PositionType::Buy,
            volume,
            open: 100.0,
            stoploss: sl,
            takeprofit: tp,
            comment: comment.parse().unwrap(),
        }
    }

    fn pending(id: Ticket, order_type: RemoteOrderType, comment: &str) -> OrderSnapshot {
        OrderSnapshot {
            id,
            symbol: Symbol::new("EURUSD"),
            order_type,
            state: RemoteOrderState::Placed,
            volume: 1.0,
            open: 95.0,
            stoploss: 0.0,
            takeprofit: 0.0,
            comment: comment.parse().unwrap(),
        }
    }

    #[test]
    fn test_position_with_bracket_rebuilt_from_tags() {
        let mut engine = OrderEngine::default();
        let report = engine.reconcile(&[position(900, 2.0, 90.0, 110.0, "ref=5|sl=6|tp=7")], &[]);

        assert_eq!(report.synthesized, vec![5, 6, 7]);
        assert_eq!(engine.order(5).unwrap().status, OrderStatus::Completed);
        assert_eq!(engine.order(6).unwrap().status, OrderStatus::Submitted);
        assert_eq!(engine.order(7).unwrap().kind, OrderKind::Limit);
        assert_eq!(engine.order(6).unwrap().side, Side::Sell);
        assert!(engine.order(7).unwrap().active);

        let bracket = engine.bracket(5).unwrap();
        assert_eq!(bracket.members(), vec![6, 7]);
        assert_eq!(engine.ticket(5), Some(900));

        let position = engine.position(&Symbol::new("EURUSD"));
        assert_relative_eq!(position.size, 2.0);
        assert_relative_eq!(position.price, 100.0);
    }

    #[test]
    fn test_bracket_fill_after_rebuild() {
        let mut engine = OrderEngine::default();
        engine.reconcile(&[position(900, 1.0, 90.0, 110.0, "ref=5|sl=6|tp=7")], &[]);

        engine.process_order(5, RemoteOrderState::Filled, -1.0, 89.0);

        assert_eq!(engine.order(6).unwrap().status, OrderStatus::Completed);
        assert_eq!(engine.order(7).unwrap().status, OrderStatus::Canceled);
        assert!(engine.position(&Symbol::new("EURUSD")).is_flat());
    }

    #[test]
    fn test_untagged_position_gets_fresh_id() {
        let mut engine = OrderEngine::default();
        let report = engine.reconcile(&[position(901, 1.0, 0.0, 0.0, "manual")], &[]);

        assert_eq!(report.synthesized.len(), 1);
        let id = report.synthesized[0];
        assert_eq!(engine.order(id).unwrap().status, OrderStatus::Completed);
        assert!(engine.bracket(id).is_none());
    }

    #[test]
    fn test_reconnect_does_not_duplicate() {
        let mut engine = OrderEngine::default();
        let positions = [position(900, 1.0, 90.0, 110.0, "ref=5|sl=6|tp=7")];
        let orders = [pending(901, RemoteOrderType::BuyLimit, "ref=8")];

        engine.reconcile(&positions, &orders);
        let count = engine.orders().count();

        let report = engine.reconcile(&positions, &orders);
        assert!(report.synthesized.is_empty());
        assert_eq!(report.refreshed, vec![5, 8]);
        assert_eq!(engine.orders().count(), count);
        assert_relative_eq!(engine.position(&Symbol::new("EURUSD")).size, 1.0);
    }

    #[test]
    fn test_colliding_tag_is_aliased() {
        let mut engine = OrderEngine::default();
        let local = engine
            .create_order(Side::Buy, OrderRequest::limit("EURUSD", 1.0, 90.0))
            .unwrap();
        engine.take_commands();

        let tag = format!("ref={}", local.id);
        let report = engine.reconcile(&[], &[pending(950, RemoteOrderType::SellLimit, &tag)]);

        assert_eq!(report.synthesized.len(), 1);
        assert_ne!(report.synthesized[0], local.id);
        assert_eq!(engine.order(local.id).unwrap().side, Side::Buy);
    }

    #[test]
    fn test_oco_partner_linked_through_tags() {
        let mut engine = OrderEngine::default();
        engine.reconcile(
            &[],
            &[
                pending(910, RemoteOrderType::BuyLimit, "ref=3"),
                pending(911, RemoteOrderType::BuyStop, "ref=4|oco=3"),
            ],
        );
        engine.take_commands();
        assert_eq!(engine.order(4).unwrap().oco, Some(3));

        engine.process_order(3, RemoteOrderState::Filled, 1.0, 95.0);
        let cancels: Vec<_> = engine
            .take_commands()
            .into_iter()
            .filter(|c| matches!(c, Command::Cancel(_)))
            .collect();
        assert_eq!(cancels, vec![Command::Cancel(4)]);
    }

    #[test]
    fn test_order_with_vanished_partner_is_cancelled() {
        let mut engine = OrderEngine::default();
        engine.reconcile(&[], &[pending(920, RemoteOrderType::SellStop, "ref=12|oco=11")]);

        assert!(engine.take_commands().contains(&Command::Cancel(12)));
    }

    #[test]
    fn test_finished_orders_are_skipped_and_missing_reported() {
        let mut engine = OrderEngine::default();
        let local = engine
            .create_order(Side::Buy, OrderRequest::limit("EURUSD", 1.0, 90.0))
            .unwrap();
        engine.bind_ticket(local.id, 930, RemoteOrderType::BuyLimit);

        let mut done = pending(931, RemoteOrderType::BuyLimit, "ref=40");
        done.state = RemoteOrderState::Canceled;
        let report = engine.reconcile(&[], &[done]);

        assert_eq!(report.skipped, 1);
        assert_eq!(report.missing, vec![local.id]);
        assert!(engine.order(40).is_none());
    }

    #[test]
    fn test_alive_order_seen_as_position_is_completed() {
        let mut engine = OrderEngine::default();
        let local = engine
            .create_order(Side::Buy, OrderRequest::market("EURUSD", 1.0))
            .unwrap();
        engine.bind_ticket(local.id, 940, RemoteOrderType::Buy);

        let mut snapshot = position(940, 1.0, 0.0, 0.0, "");
        snapshot.comment = OrderTags::with_reference(local.id);
        let report = engine.reconcile(&[snapshot], &[]);

        assert!(report.synthesized.is_empty());
        assert_eq!(engine.order(local.id).unwrap().status, OrderStatus::Completed);
        assert_relative_eq!(engine.position(&Symbol::new("EURUSD")).size, 1.0);
    }

    #[test]
    fn test_legs_of_closed_position_are_cancelled() {
        let mut engine = OrderEngine::default();
        engine.reconcile(&[position(900, 1.0, 90.0, 110.0, "ref=5|sl=6|tp=7")], &[]);
        engine.take_commands();

        let report = engine.reconcile(&[], &[]);

        assert_eq!(report.missing, vec![6, 7]);
        assert_eq!(engine.order(6).unwrap().status, OrderStatus::Canceled);
        assert_eq!(engine.order(7).unwrap().status, OrderStatus::Canceled);
        assert!(engine.bracket(5).is_none());
        assert!(engine.position(&Symbol::new("EURUSD")).is_flat());
        assert!(engine.take_commands().is_empty());

        // Nothing left to sweep on the next pass
        let report = engine.reconcile(&[], &[]);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn test_legs_of_missing_pending_primary_are_reported() {
        let mut engine = OrderEngine::default();
        let primary = engine
            .create_order(
                Side::Buy,
                OrderRequest::limit("EURUSD", 1.0, 95.0).with_transmit(false),
            )
            .unwrap();
        let stop = engine
            .create_order(
                Side::Sell,
                OrderRequest::stop("EURUSD", 1.0, 90.0).with_parent(primary.id),
            )
            .unwrap();
        engine.bind_ticket(primary.id, 960, RemoteOrderType::BuyLimit);
        engine.take_commands();

        let report = engine.reconcile(&[], &[]);

        assert_eq!(report.missing, vec![primary.id, stop.id]);
        assert!(engine.order(primary.id).unwrap().is_alive());
        assert!(engine.order(stop.id).unwrap().is_alive());
    }

    #[test]
    fn test_out_of_range_tag_is_aliased() {
        let mut engine = OrderEngine::default();
        let comment = format!("ref={}", OrderId::MAX);
        let report = engine.reconcile(&[position(970, 1.0, 0.0, 0.0, &comment)], &[]);

        assert_eq!(report.synthesized.len(), 1);
        let id = report.synthesized[0];
        assert_ne!(id, OrderId::MAX);
        assert_eq!(engine.order(id).unwrap().status, OrderStatus::Completed);

        let next = engine
            .create_order(Side::Buy, OrderRequest::market("EURUSD", 1.0))
            .unwrap();
        assert!(next.id > id);
    }
}
