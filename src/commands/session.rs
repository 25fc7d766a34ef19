//! Session files replayed against the paper terminal
//!
//! A session seeds the terminal snapshot and balance, then lists the steps
//! to run in order: strategy orders, cancels, streaming transactions, ticks
//! and reconnects.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use terminal_oms::oms::OrderRequest;
use terminal_oms::terminal::{LiveTick, OrderSnapshot, PositionSnapshot, TransactionEvent};
use terminal_oms::types::{Balance, OrderId, OrderKind, Symbol};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub balance: Option<Balance>,
    #[serde(default)]
    pub positions: Vec<PositionSnapshot>,
    #[serde(default)]
    pub orders: Vec<OrderSnapshot>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Session {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse session JSON")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Buy(ScriptedOrder),
    Sell(ScriptedOrder),
    Cancel { id: OrderId },
    Event(TransactionEvent),
    Tick(LiveTick),
    Reconnect,
}

fn default_transmit() -> bool {
    true
}

fn default_kind() -> OrderKind {
    OrderKind::Market
}

/// Order placed by a session step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedOrder {
    pub symbol: Symbol,
    pub size: f64,
    #[serde(default = "default_kind")]
    pub kind: OrderKind,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub price_limit: Option<f64>,
    #[serde(default)]
    pub parent: Option<OrderId>,
    #[serde(default)]
    pub oco: Option<OrderId>,
    #[serde(default = "default_transmit")]
    pub transmit: bool,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl From<ScriptedOrder> for OrderRequest {
    fn from(o: ScriptedOrder) -> Self {
        let mut request = match o.kind {
            OrderKind::Market => OrderRequest::market(o.symbol, o.size),
            OrderKind::Limit => OrderRequest::limit(o.symbol, o.size, o.price.unwrap_or_default()),
            OrderKind::Stop => OrderRequest::stop(o.symbol, o.size, o.price.unwrap_or_default()),
            OrderKind::StopLimit => OrderRequest::stop_limit(
                o.symbol,
                o.size,
                o.price.unwrap_or_default(),
                o.price_limit.unwrap_or_default(),
            ),
        }
        .with_transmit(o.transmit);
        request.parent = o.parent;
        request.oco = o.oco;
        request.info = o.info;
        request
    }
}
