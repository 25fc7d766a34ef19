//! Bracket and OCO group tracking

use std::collections::HashMap;

use crate::types::OrderId;

/// Role of an order inside a bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketRole {
    Primary,
    Stop,
    TakeProfit,
}

/// A primary order and its protective legs
///
/// Before the primary fills the group holds `[primary, stop?, take_profit?]`;
/// afterwards only the legs remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bracket {
    pub primary: Option<OrderId>,
    pub stop: Option<OrderId>,
    pub take_profit: Option<OrderId>,
}

impl Bracket {
    pub fn new(primary: OrderId) -> Self {
        Self {
            primary: Some(primary),
            stop: None,
            take_profit: None,
        }
    }

    pub fn with_stop(mut self, stop: Option<OrderId>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_take_profit(mut self, take_profit: Option<OrderId>) -> Self {
        self.take_profit = take_profit;
        self
    }

    /// Members in `[primary, stop, take_profit]` order
    pub fn members(&self) -> Vec<OrderId> {
        [self.primary, self.stop, self.take_profit]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Protective legs in `[stop, take_profit]` order
    pub fn legs(&self) -> Vec<OrderId> {
        [self.stop, self.take_profit].into_iter().flatten().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.stop.is_none() && self.take_profit.is_none()
    }

    pub fn role_of(&self, id: OrderId) -> Option<BracketRole> {
        if self.primary == Some(id) {
            Some(BracketRole::Primary)
        } else if self.stop == Some(id) {
            Some(BracketRole::Stop)
        } else if self.take_profit == Some(id) {
            Some(BracketRole::TakeProfit)
        } else {
            None
        }
    }

    /// The protective leg that is not `id`
    pub fn other_leg(&self, id: OrderId) -> Option<OrderId> {
        match self.role_of(id)? {
            BracketRole::Stop => self.take_profit,
            BracketRole::TakeProfit => self.stop,
            BracketRole::Primary => None,
        }
    }
}

/// Tracks bracket groups and OCO groups
#[derive(Debug, Default)]
pub struct GroupTracker {
    /// primary id → bracket
    brackets: HashMap<OrderId, Bracket>,
    /// member → canonical OCO key
    oco_keys: HashMap<OrderId, OrderId>,
    /// canonical OCO key → members (append-only)
    oco_groups: HashMap<OrderId, Vec<OrderId>>,
}

impl GroupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bracket(&mut self, key: OrderId, bracket: Bracket) {
        self.brackets.insert(key, bracket);
    }

    pub fn bracket(&self, key: OrderId) -> Option<&Bracket> {
        self.brackets.get(&key)
    }

    /// Remove a bracket; only the first caller gets it
    pub fn take_bracket(&mut self, key: OrderId) -> Option<Bracket> {
        self.brackets.remove(&key)
    }

    /// Every tracked bracket with its key
    pub fn brackets(&self) -> impl Iterator<Item = (OrderId, &Bracket)> {
        self.brackets.iter().map(|(key, bracket)| (*key, bracket))
    }

    /// Register `id` in the OCO group of `partner`
    ///
    /// Groups are built lazily: the first order naming a partner turns the
    /// partner into the group's canonical key.
    pub fn ocoize(&mut self, id: OrderId, partner: OrderId) {
        let canonical = match self.oco_keys.get(&partner) {
            Some(&key) => key,
            None => {
                self.oco_keys.insert(partner, partner);
                self.oco_groups.entry(partner).or_default().push(partner);
                partner
            }
        };
        self.oco_keys.insert(id, canonical);
        let members = self.oco_groups.entry(canonical).or_default();
        if !members.contains(&id) {
            members.push(id);
        }
    }

    /// Canonical key of the group `id` belongs to
    pub fn oco_key(&self, id: OrderId) -> Option<OrderId> {
        self.oco_keys.get(&id).copied()
    }

    pub fn oco_members(&self, canonical: OrderId) -> Option<&[OrderId]> {
        self.oco_groups.get(&canonical).map(Vec::as_slice)
    }

    /// Pop the group `id` belongs to
    ///
    /// Both the member's key and the group are removed, so a group is handed
    /// out at most once.
    pub fn take_oco_group(&mut self, id: OrderId) -> Vec<OrderId> {
        let canonical = self.oco_keys.remove(&id).unwrap_or(id);
        self.oco_groups.remove(&canonical).unwrap_or_default()
    }
}
