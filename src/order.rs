//! Order domain types shared across the engine: sides, order kinds,
//! time-in-force, and the tick-based price representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod book;

/// Unique order identifier, assigned by the submitting client.
pub type Id = u64;
/// Order size in whole units.
pub type Quantity = u64;
/// Price expressed as integer multiples of [`MIN_PRICE_INCREMENT`].
pub type Price = u64; // ticks

/// Smallest representable price difference. Two decimal prices closer than
/// one increment normalize to the same tick and therefore the same book level.
pub const MIN_PRICE_INCREMENT: f64 = 0.01;

// Largest tick count that survives an exact f64 round trip (2^53).
const MAX_TICKS: f64 = 9_007_199_254_740_992.0;

/// Convert a decimal price into ticks, rounding to the nearest increment.
///
/// Returns `None` for non-finite, negative, or unrepresentably large inputs.
pub fn price_from_decimal(price: f64) -> Option<Price> {
    if !price.is_finite() || price < 0.0 {
        return None;
    }
    let ticks = (price / MIN_PRICE_INCREMENT).round();
    if ticks > MAX_TICKS {
        return None;
    }
    Some(ticks as Price)
}

/// Convert a tick price back into its decimal representation.
pub fn price_to_decimal(price: Price) -> f64 {
    price as f64 * MIN_PRICE_INCREMENT
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side an incoming order trades against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// How long an order may work before its remainder is discarded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Rest in the book until cancelled.
    Gtc,
    /// Take whatever is immediately available, discard the rest.
    Ioc,
    /// Execute in full immediately or reject without trading.
    Fok,
}

/// A single order, either incoming or resting in a price level.
///
/// The engine owns every accepted order; callers hand orders in by value and
/// get back an id or a typed error.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Id,
    pub side: Side,
    pub kind: OrderType,
    pub tif: TimeInForce,
    /// Limit price in ticks. Present but ignored for market orders.
    pub price: Price,
    pub quantity: Quantity,
    /// Executed quantity so far. Never exceeds `quantity`.
    pub filled: Quantity,
    pub symbol: String,
    pub account: String,
    /// Logical acceptance stamp assigned by the engine. Strictly increasing
    /// across accepted orders; a re-priced order receives a fresh stamp.
    pub accepted_at: u64,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Id,
        side: Side,
        kind: OrderType,
        tif: TimeInForce,
        price: Price,
        quantity: Quantity,
        symbol: String,
        account: String,
    ) -> Self {
        Order {
            id,
            side,
            kind,
            tif,
            price,
            quantity,
            filled: 0,
            symbol,
            account,
            accepted_at: 0,
        }
    }

    pub fn remaining(&self) -> Quantity {
        self.quantity - self.filled
    }

    pub fn is_filled(&self) -> bool {
        self.filled == self.quantity
    }

    /// Whether this order may trade against a resting level at `level_price`.
    pub fn crosses(&self, level_price: Price) -> bool {
        match self.kind {
            OrderType::Market => true,
            OrderType::Limit => match self.side {
                Side::Buy => level_price <= self.price,
                Side::Sell => level_price >= self.price,
            },
        }
    }
}
