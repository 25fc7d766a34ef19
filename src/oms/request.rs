//! Order requests issued by the owning strategy

use std::collections::BTreeMap;

use crate::types::{OrderId, OrderKind, Symbol, Validity};

/// Parameters of a `buy`/`sell` call
///
/// The side is given by the broker method that receives the request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: Symbol,
    /// Positive quantity
    pub size: f64,
    pub kind: OrderKind,
    /// Limit or stop price; ignored for market orders
    pub price: Option<f64>,
    /// Limit price of a stop-limit order
    pub price_limit: Option<f64>,
    pub validity: Validity,
    /// Partner order for one-cancels-other
    pub oco: Option<OrderId>,
    /// Primary order when this request is a protective leg
    pub parent: Option<OrderId>,
    /// `false` holds the order until the bracket's transmitting leg arrives
    pub transmit: bool,
    /// Free-form caller tags copied onto the order
    pub info: BTreeMap<String, String>,
}

impl OrderRequest {
    fn new(symbol: Symbol, size: f64, kind: OrderKind, price: Option<f64>) -> Self {
        Self {
            symbol,
            size,
            kind,
            price,
            price_limit: None,
            validity: Validity::Gtc,
            oco: None,
            parent: None,
            transmit: true,
            info: BTreeMap::new(),
        }
    }

    pub fn market(symbol: impl Into<Symbol>, size: f64) -> Self {
        Self::new(symbol.into(), size, OrderKind::Market, None)
    }

    pub fn limit(symbol: impl Into<Symbol>, size: f64, price: f64) -> Self {
        Self::new(symbol.into(), size, OrderKind::Limit, Some(price))
    }

    pub fn stop(symbol: impl Into<Symbol>, size: f64, price: f64) -> Self {
        Self::new(symbol.into(), size, OrderKind::Stop, Some(price))
    }

    pub fn stop_limit(symbol: impl Into<Symbol>, size: f64, price: f64, price_limit: f64) -> Self {
        let mut request = Self::new(symbol.into(), size, OrderKind::StopLimit, Some(price));
        request.price_limit = Some(price_limit);
        request
    }

    pub fn with_parent(mut self, parent: OrderId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_oco(mut self, partner: OrderId) -> Self {
        self.oco = Some(partner);
        self
    }

    pub fn with_transmit(mut self, transmit: bool) -> Self {
        self.transmit = transmit;
        self
    }

    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }
}
