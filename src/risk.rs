//! Pre-trade risk checks applied before any book mutation.
//!
//! Every add (and every exposure-increasing modify) passes through the gate
//! synchronously. A rejection leaves no trace: no state change, no events, no
//! sequence numbers consumed. Violations carry human-readable reasons.

use crate::order::{self, Order, OrderType, Price, Quantity, Side};
use crate::portfolio::Portfolio;
use thiserror::Error;

/// Process-wide limits, read from configuration once at engine construction.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Largest admissible order quantity.
    pub max_order_size: Quantity,
    /// Highest admissible limit price, in ticks.
    pub max_price: Price,
    /// Largest admissible absolute net position per account.
    pub max_position: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            max_order_size: 10_000,
            max_price: 100_000_000, // 1,000,000.00
            max_position: 1_000_000,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("order size {size} exceeds the limit of {limit}")]
    OrderTooLarge { size: Quantity, limit: Quantity },
    #[error("price {price:.2} is outside the allowed band (0, {limit:.2}]")]
    PriceOutOfBand { price: f64, limit: f64 },
    #[error(
        "account {account} position would move from {current} to {resulting}, \
         beyond the limit of {limit}"
    )]
    PositionLimit {
        account: String,
        current: i64,
        resulting: i128,
        limit: i64,
    },
}

/// The gate itself. Owns the configured limits; reads positions from the
/// portfolio it is handed.
#[derive(Debug)]
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        RiskGate { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate a new order: size limit, price band for limit orders, and the
    /// worst-case position check as if the order fully executed.
    pub fn check_order(&self, order: &Order, portfolio: &Portfolio) -> Result<(), Violation> {
        self.check_size(order.quantity)?;
        if order.kind == OrderType::Limit {
            self.check_price(order.price)?;
        }
        self.check_position(
            &order.account,
            &order.symbol,
            order.side,
            order.quantity,
            portfolio,
        )
    }

    pub fn check_size(&self, quantity: Quantity) -> Result<(), Violation> {
        if quantity > self.limits.max_order_size {
            return Err(Violation::OrderTooLarge {
                size: quantity,
                limit: self.limits.max_order_size,
            });
        }
        Ok(())
    }

    pub fn check_price(&self, price: Price) -> Result<(), Violation> {
        if price == 0 || price > self.limits.max_price {
            return Err(Violation::PriceOutOfBand {
                price: order::price_to_decimal(price),
                limit: order::price_to_decimal(self.limits.max_price),
            });
        }
        Ok(())
    }

    /// Worst-case hypothetical position: the account's current net position
    /// shifted by `quantity` in the order's direction must stay within the
    /// absolute position limit.
    pub fn check_position(
        &self,
        account: &str,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        portfolio: &Portfolio,
    ) -> Result<(), Violation> {
        let current = portfolio.position(account, symbol);
        let resulting = match side {
            Side::Buy => i128::from(current) + i128::from(quantity),
            Side::Sell => i128::from(current) - i128::from(quantity),
        };
        if resulting.unsigned_abs() > self.limits.max_position.unsigned_abs().into() {
            return Err(Violation::PositionLimit {
                account: account.to_string(),
                current,
                resulting,
                limit: self.limits.max_position,
            });
        }
        Ok(())
    }
}
