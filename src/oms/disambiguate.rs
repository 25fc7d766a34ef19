//! Attribution of ambiguous bracket fills
//!
//! The terminal carries stop-loss and take-profit as attributes of the
//! primary position, so when one of them triggers the fill is reported
//! against the primary's ticket. The fill price tells which one it was.

use crate::types::Side;

/// Which protective leg a fill belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillTarget {
    Stop,
    TakeProfit,
}

/// Decide the leg from the bracket's origin side and the take-profit price
///
/// Long brackets take profit above the entry, so a fill at or above the
/// take-profit price is the take-profit; short brackets mirror that.
pub fn attribute_fill(origin: Side, take_profit_price: f64, fill_price: f64) -> FillTarget {
    let hit_take_profit = match origin {
        Side::Buy => fill_price >= take_profit_price,
        Side::Sell => fill_price <= take_profit_price,
    };
    if hit_take_profit {
        FillTarget::TakeProfit
    } else {
        FillTarget::Stop
    }
}
