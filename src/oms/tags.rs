//! Order tags carried through the terminal's free-text comment field
//!
//! The terminal keeps a single comment string per order/position. The
//! engine stores the local identifiers of a bracket there so they survive a
//! restart: `ref=5|sl=6|tp=7|oco=3`. Parsing is confined to this module;
//! everything else works with [`OrderTags`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::types::OrderId;

/// Structured view of the comment metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderTags {
    /// Local id of the primary order
    pub reference: Option<OrderId>,
    /// Local id of the stop-loss leg
    pub stop_loss: Option<OrderId>,
    /// Local id of the take-profit leg
    pub take_profit: Option<OrderId>,
    /// Local id of the OCO partner
    pub oco: Option<OrderId>,
}

impl OrderTags {
    pub fn with_reference(id: OrderId) -> Self {
        Self {
            reference: Some(id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_none()
            && self.stop_loss.is_none()
            && self.take_profit.is_none()
            && self.oco.is_none()
    }
}

impl fmt::Display for OrderTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = [
            ("ref", self.reference),
            ("sl", self.stop_loss),
            ("tp", self.take_profit),
            ("oco", self.oco),
        ];
        let mut first = true;
        for (key, value) in pairs {
            if let Some(value) = value {
                if !first {
                    f.write_str("|")?;
                }
                write!(f, "{}={}", key, value)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for OrderTags {
    type Err = std::convert::Infallible;

    /// Lenient parse: malformed pairs are skipped
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tags = OrderTags::default();
        for pair in s.split('|').filter(|p| !p.trim().is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                debug!(pair, "Skipping comment fragment without '='");
                continue;
            };
            let Ok(id) = value.trim().parse::<OrderId>() else {
                debug!(pair, "Skipping comment fragment with non-numeric id");
                continue;
            };
            match key.trim() {
                "ref" => tags.reference = Some(id),
                "sl" => tags.stop_loss = Some(id),
                "tp" => tags.take_profit = Some(id),
                "oco" => tags.oco = Some(id),
                other => debug!(key = other, "Skipping unknown comment key"),
            }
        }
        Ok(tags)
    }
}

impl Serialize for OrderTags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderTags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .map(|s| s.parse().unwrap_or_default())
            .unwrap_or_default())
    }
}
