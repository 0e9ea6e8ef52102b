//! Per-account net positions, updated on every execution.
//!
//! A buy fill increments the buyer's net position in the traded symbol by the
//! trade quantity; a sell fill decrements the seller's. The risk gate reads
//! these positions for its worst-case admission check.

use std::collections::HashMap;

/// Account used when an order carries an empty account string.
pub const DEFAULT_ACCOUNT: &str = "default";

#[derive(Debug, Default)]
pub struct Portfolio {
    positions: HashMap<String, HashMap<String, i64>>,
}

impl Portfolio {
    pub fn new() -> Self {
        Portfolio::default()
    }

    /// Net position for `account` in `symbol`. Flat positions read as zero.
    pub fn position(&self, account: &str, symbol: &str) -> i64 {
        self.positions
            .get(account)
            .and_then(|by_symbol| by_symbol.get(symbol))
            .copied()
            .unwrap_or(0)
    }

    /// Apply one execution: the buyer gains `quantity`, the seller loses it.
    /// Both sides may be the same account, which nets to no change.
    pub fn apply_fill(&mut self, buyer: &str, seller: &str, symbol: &str, quantity: u64) {
        let delta = i64::try_from(quantity).unwrap_or(i64::MAX);
        self.adjust(buyer, symbol, delta);
        self.adjust(seller, symbol, -delta);
    }

    fn adjust(&mut self, account: &str, symbol: &str, delta: i64) {
        let position = self
            .positions
            .entry(account.to_string())
            .or_default()
            .entry(symbol.to_string())
            .or_default();
        *position = position.saturating_add(delta);
    }
}
