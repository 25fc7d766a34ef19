//! Order registry: local records plus the local ↔ terminal id tables

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::oms::types::Order;
use crate::terminal::protocol::RemoteOrderType;
use crate::types::{OrderId, Ticket};

/// Tag ids at or above this are never adopted as local ids
pub const MAX_ADOPTED_ID: OrderId = 1 << 53;

/// Monotonic local id space
///
/// Ids embedded in terminal comments can be adopted, but the counter only
/// ever moves forward so a fresh id never collides with an adopted one.
#[derive(Debug)]
pub struct IdSequence {
    next: OrderId,
}

impl Default for IdSequence {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdSequence {
    pub fn next_id(&mut self) -> OrderId {
        let id = self.next;
        self.next += 1;
        id
    }

    fn observe(&mut self, id: OrderId) {
        if id >= self.next {
            self.next = id + 1;
        }
    }
}

/// Registry of every order the engine knows about
#[derive(Debug, Default)]
pub struct OrderRegistry {
    /// Records ordered by id
    orders: BTreeMap<OrderId, Order>,
    /// local id → terminal ticket
    tickets: HashMap<OrderId, Ticket>,
    /// terminal ticket → local id
    local_ids: HashMap<Ticket, OrderId>,
    /// Order type used when the order was transmitted
    remote_types: HashMap<OrderId, RemoteOrderType>,
    /// Tag id seen in a terminal comment → local id it was mapped to
    aliases: HashMap<OrderId, OrderId>,
    ids: IdSequence,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> OrderId {
        self.ids.next_id()
    }

    /// Pick a local id for an order rebuilt from a terminal comment
    ///
    /// The tagged id is reused when it is still free and below
    /// [`MAX_ADOPTED_ID`]; otherwise a fresh id is allocated and the tag is
    /// remembered as an alias.
    pub fn adopt_id(&mut self, tagged: Option<OrderId>) -> OrderId {
        let Some(tagged) = tagged else {
            return self.ids.next_id();
        };
        if let Some(&known) = self.aliases.get(&tagged) {
            if !self.orders.contains_key(&known) {
                return known;
            }
        }
        if tagged < MAX_ADOPTED_ID && !self.orders.contains_key(&tagged) {
            self.ids.observe(tagged);
            self.aliases.insert(tagged, tagged);
            return tagged;
        }
        let fresh = self.ids.next_id();
        debug!(tagged, fresh, "Tagged id unusable, allocating alias");
        self.aliases.insert(tagged, fresh);
        fresh
    }

    /// Local id that a tag id refers to
    pub fn resolve_tag(&self, tagged: OrderId) -> Option<OrderId> {
        self.aliases
            .get(&tagged)
            .copied()
            .filter(|id| self.orders.contains_key(id))
    }

    pub fn insert(&mut self, order: Order) {
        self.ids.observe(order.id);
        self.orders.insert(order.id, order);
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.orders.contains_key(&id)
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    pub fn is_alive(&self, id: OrderId) -> bool {
        self.orders.get(&id).is_some_and(Order::is_alive)
    }

    /// Orders in id order
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Record the ticket the terminal assigned to a local order
    pub fn bind_ticket(&mut self, id: OrderId, ticket: Ticket, remote_type: RemoteOrderType) {
        if let Some(previous) = self.tickets.insert(id, ticket) {
            self.local_ids.remove(&previous);
        }
        self.local_ids.insert(ticket, id);
        self.remote_types.insert(id, remote_type);
    }

    pub fn ticket(&self, id: OrderId) -> Option<Ticket> {
        self.tickets.get(&id).copied()
    }

    pub fn local_id(&self, ticket: Ticket) -> Option<OrderId> {
        self.local_ids.get(&ticket).copied()
    }

    pub fn remote_type(&self, id: OrderId) -> Option<RemoteOrderType> {
        self.remote_types.get(&id).copied()
    }
}
