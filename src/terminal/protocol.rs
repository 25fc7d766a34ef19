//! Value types exchanged with the terminal
//!
//! These mirror the terminal's JSON API: requests, replies, snapshot rows
//! and streaming transactions. Field names follow the terminal; the
//! `comment` field is decoded into [`OrderTags`].

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};
use crate::oms::tags::OrderTags;
use crate::types::{OrderKind, Side, Symbol, Ticket};

/// Order types understood by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteOrderType {
    #[serde(rename = "ORDER_TYPE_BUY")]
    Buy,
    #[serde(rename = "ORDER_TYPE_SELL")]
    Sell,
    #[serde(rename = "ORDER_TYPE_BUY_LIMIT")]
    BuyLimit,
    #[serde(rename = "ORDER_TYPE_SELL_LIMIT")]
    SellLimit,
    #[serde(rename = "ORDER_TYPE_BUY_STOP")]
    BuyStop,
    #[serde(rename = "ORDER_TYPE_SELL_STOP")]
    SellStop,
    #[serde(rename = "ORDER_TYPE_BUY_STOP_LIMIT")]
    BuyStopLimit,
    #[serde(rename = "ORDER_TYPE_SELL_STOP_LIMIT")]
    SellStopLimit,
}

impl RemoteOrderType {
    /// Terminal order type for a local order
    ///
    /// Stop-limit orders cannot be transmitted; callers get a configuration
    /// error before anything is sent.
    pub fn for_order(kind: OrderKind, side: Side) -> BrokerResult<Self> {
        let remote = match (kind, side) {
            (OrderKind::Market, Side::Buy) => Self::Buy,
            (OrderKind::Market, Side::Sell) => Self::Sell,
            (OrderKind::Limit, Side::Buy) => Self::BuyLimit,
            (OrderKind::Limit, Side::Sell) => Self::SellLimit,
            (OrderKind::Stop, Side::Buy) => Self::BuyStop,
            (OrderKind::Stop, Side::Sell) => Self::SellStop,
            (OrderKind::StopLimit, side) => {
                return Err(BrokerError::UnsupportedOrderType {
                    kind: OrderKind::StopLimit,
                    side,
                })
            }
        };
        Ok(remote)
    }

    pub fn side(self) -> Side {
        match self {
            Self::Buy | Self::BuyLimit | Self::BuyStop | Self::BuyStopLimit => Side::Buy,
            Self::Sell | Self::SellLimit | Self::SellStop | Self::SellStopLimit => Side::Sell,
        }
    }

    pub fn kind(self) -> OrderKind {
        match self {
            Self::Buy | Self::Sell => OrderKind::Market,
            Self::BuyLimit | Self::SellLimit => OrderKind::Limit,
            Self::BuyStop | Self::SellStop => OrderKind::Stop,
            Self::BuyStopLimit | Self::SellStopLimit => OrderKind::StopLimit,
        }
    }

    /// Market types open positions; cancelling them means closing the position
    pub fn is_market(self) -> bool {
        self.kind() == OrderKind::Market
    }
}

/// Order states reported by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteOrderState {
    #[serde(rename = "ORDER_STATE_STARTED")]
    Started,
    #[serde(rename = "ORDER_STATE_PLACED")]
    Placed,
    #[serde(rename = "ORDER_STATE_CANCELED")]
    Canceled,
    #[serde(rename = "ORDER_STATE_PARTIAL")]
    Partial,
    #[serde(rename = "ORDER_STATE_FILLED")]
    Filled,
    #[serde(rename = "ORDER_STATE_REJECTED")]
    Rejected,
    #[serde(rename = "ORDER_STATE_EXPIRED")]
    Expired,
    #[serde(rename = "ORDER_STATE_REQUEST_ADD")]
    RequestAdd,
    #[serde(rename = "ORDER_STATE_REQUEST_MODIFY")]
    RequestModify,
    #[serde(rename = "ORDER_STATE_REQUEST_CANCEL")]
    RequestCancel,
    #[serde(other)]
    Unknown,
}

impl RemoteOrderState {
    /// States in which an order is still working at the terminal
    pub fn is_working(self) -> bool {
        matches!(self, Self::Started | Self::Placed | Self::Partial)
    }
}

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionType {
    #[serde(rename = "POSITION_TYPE_BUY")]
    Buy,
    #[serde(rename = "POSITION_TYPE_SELL")]
    Sell,
}

impl PositionType {
    pub fn side(self) -> Side {
        match self {
            Self::Buy => Side::Buy,
            Self::Sell => Side::Sell,
        }
    }
}

/// Kinds of streaming trade transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "TRADE_TRANSACTION_ORDER_ADD")]
    OrderAdd,
    #[serde(rename = "TRADE_TRANSACTION_ORDER_UPDATE")]
    OrderUpdate,
    #[serde(rename = "TRADE_TRANSACTION_ORDER_DELETE")]
    OrderDelete,
    #[serde(rename = "TRADE_TRANSACTION_DEAL_ADD")]
    DealAdd,
    #[serde(rename = "TRADE_TRANSACTION_HISTORY_ADD")]
    HistoryAdd,
    #[serde(rename = "TRADE_TRANSACTION_POSITION")]
    Position,
    #[serde(rename = "TRADE_TRANSACTION_REQUEST")]
    Request,
    #[serde(other)]
    Other,
}

/// Order creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub action_type: RemoteOrderType,
    pub symbol: Symbol,
    /// Absolute volume
    pub volume: f64,
    /// Omitted for market orders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stoploss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub takeprofit: Option<f64>,
    /// Unix seconds; 0 = good till cancelled
    pub expiration: i64,
    pub comment: OrderTags,
}

/// Synchronous answer to a request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReply {
    pub error: bool,
    #[serde(default, alias = "desription")]
    pub description: String,
    /// Ticket of the created order
    #[serde(default)]
    pub order: Option<Ticket>,
}

impl TradeReply {
    pub fn accepted(ticket: Ticket) -> Self {
        Self {
            error: false,
            description: String::new(),
            order: Some(ticket),
        }
    }

    pub fn refused(description: impl Into<String>) -> Self {
        Self {
            error: true,
            description: description.into(),
            order: None,
        }
    }
}

/// Open position as listed by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: Ticket,
    pub symbol: Symbol,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub volume: f64,
    /// Open price
    pub open: f64,
    /// 0 when unset
    #[serde(default)]
    pub stoploss: f64,
    /// 0 when unset
    #[serde(default)]
    pub takeprofit: f64,
    #[serde(default)]
    pub comment: OrderTags,
}

impl PositionSnapshot {
    pub fn side(&self) -> Side {
        self.position_type.side()
    }

    pub fn signed_volume(&self) -> f64 {
        self.side().sign() * self.volume
    }
}

/// Order as listed by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: Ticket,
    pub symbol: Symbol,
    #[serde(rename = "type")]
    pub order_type: RemoteOrderType,
    pub state: RemoteOrderState,
    pub volume: f64,
    /// Order price
    pub open: f64,
    #[serde(default)]
    pub stoploss: f64,
    #[serde(default)]
    pub takeprofit: f64,
    #[serde(default)]
    pub comment: OrderTags,
}

/// One streaming trade transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Order ticket, 0 when not applicable
    #[serde(default)]
    pub order: Ticket,
    /// Position ticket, 0 when not applicable
    #[serde(default)]
    pub position: Ticket,
    #[serde(default)]
    pub order_state: Option<RemoteOrderState>,
    #[serde(default)]
    pub order_type: Option<RemoteOrderType>,
    pub symbol: Symbol,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub price: f64,
}

impl TransactionEvent {
    /// Volume signed by the order type (sells are negative)
    pub fn signed_volume(&self) -> f64 {
        match self.order_type.map(RemoteOrderType::side) {
            Some(Side::Sell) => -self.volume,
            _ => self.volume,
        }
    }
}

/// Live price tick, only used to pace the owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTick {
    pub symbol: Symbol,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
}
