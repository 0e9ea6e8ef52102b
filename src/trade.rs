//! Trade representation produced by the matching engine.
//!
//! A trade links the buy and sell orders that matched, along with the
//! execution price (always the resting maker's price), quantity, symbol,
//! and a timestamp.

use crate::order;
use time::OffsetDateTime;

/// Unique trade identifier, assigned monotonically by the engine.
pub type Id = u64;

/// A single execution between a buy and a sell order.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub id: Id,
    pub buy_order_id: order::Id,
    pub sell_order_id: order::Id,
    /// Execution price in ticks.
    pub price: order::Price,
    /// Executed quantity for this trade.
    pub quantity: order::Quantity,
    pub symbol: String,
    /// UTC timestamp when the trade was generated.
    pub timestamp: OffsetDateTime,
}
