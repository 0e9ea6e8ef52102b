//! The matching engine for one symbol: order entry, matching, position
//! accounting, and market-data emission.
//!
//! Every operation runs the same pipeline: validate, risk-check, mutate the
//! book, then emit events. A rejected operation leaves no trace: no state
//! change, no events, no sequence numbers. The engine is single-threaded by
//! contract; callers that share one instance must serialize access outside.

use crate::events::{DeltaKind, MarketEvent, Publisher, Seq};
use crate::order::{self, Order, OrderType, Price, Quantity, Side, TimeInForce};
use crate::order::book::{Book, Depth, Fill};
use crate::portfolio::{Portfolio, DEFAULT_ACCOUNT};
use crate::risk::{RiskGate, RiskLimits, Violation};
use crate::trade::{self, Trade};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const MAX_SYMBOL_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum AddError {
    #[error("another order with id #{0} is already resident")]
    DuplicateId(order::Id),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("risk check rejected order: {0}")]
    RiskRejected(#[from] Violation),
    #[error("fill-or-kill order needs {required} but only {available} can trade")]
    InsufficientLiquidity {
        required: Quantity,
        available: Quantity,
    },
    #[error("internal invariant violation: {0}")]
    Invariant(String),
    #[error("engine is halted after an internal invariant violation")]
    Halted,
}

#[derive(Error, Debug)]
pub enum CancelError {
    #[error("could not find order with id #{0}")]
    NotFound(order::Id),
    #[error("engine is halted after an internal invariant violation")]
    Halted,
}

#[derive(Error, Debug)]
pub enum ModifyError {
    #[error("could not find order with id #{0}")]
    NotFound(order::Id),
    #[error("invalid modify: {0}")]
    InvalidModify(String),
    #[error("risk check rejected modify: {0}")]
    RiskRejected(#[from] Violation),
    #[error("internal invariant violation: {0}")]
    Invariant(String),
    #[error("engine is halted after an internal invariant violation")]
    Halted,
}

/// A detected breach of the engine's structural invariants. Fatal: once one
/// is observed the engine stops accepting operations.
#[derive(Error, Debug)]
#[error("internal invariant violation: {0}")]
pub struct InvariantViolation(pub String);

/// One engine instance per symbol. Owns the book, the risk gate, the
/// portfolio ledger, and the event publisher.
pub struct Engine {
    symbol: String,
    book: Book,
    risk: RiskGate,
    portfolio: Portfolio,
    publisher: Publisher,
    last_trade_id: trade::Id,
    /// Logical clock for acceptance stamps.
    clock: u64,
    halted: bool,
}

impl Engine {
    pub fn new(symbol: impl Into<String>, limits: RiskLimits) -> Self {
        Engine::with_capacity(symbol, limits, 0)
    }

    /// Create an engine with space pre-allocated for `capacity` resting
    /// orders.
    pub fn with_capacity(symbol: impl Into<String>, limits: RiskLimits, capacity: usize) -> Self {
        Engine {
            symbol: symbol.into(),
            book: Book::with_capacity(capacity),
            risk: RiskGate::new(limits),
            portfolio: Portfolio::new(),
            publisher: Publisher::new(),
            last_trade_id: 0,
            clock: 0,
            halted: false,
        }
    }

    /// Register a market-data subscriber. Delivery is synchronous on the
    /// calling thread; register before submitting orders to see every event.
    pub fn subscribe(&mut self, subscriber: impl FnMut(&MarketEvent) + Send + 'static) {
        self.publisher.subscribe(subscriber);
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Submit a new order.
    ///
    /// On success the order has either matched in full (and been destroyed),
    /// matched in part with the remainder resting (limit GTC only), or rested
    /// untouched. Market and IOC remainders are discarded; a fill-or-kill
    /// order that cannot execute completely is rejected before any trade.
    pub fn add_order(&mut self, mut order: Order) -> Result<order::Id, AddError> {
        if self.halted {
            return Err(AddError::Halted);
        }
        self.validate_new(&order)?;
        if self.book.contains(order.id) {
            return Err(AddError::DuplicateId(order.id));
        }
        if order.account.is_empty() {
            order.account = DEFAULT_ACCOUNT.to_string();
        }
        // Market orders cannot rest, which makes them IOC by definition.
        if order.kind == OrderType::Market {
            order.tif = TimeInForce::Ioc;
        }
        if let Err(violation) = self.risk.check_order(&order, &self.portfolio) {
            warn!(order_id = order.id, %violation, "order rejected by risk gate");
            return Err(violation.into());
        }
        if order.tif == TimeInForce::Fok {
            // First pass: admit only if the opposite side can satisfy the
            // whole order at acceptable prices. No partial fill, ever.
            let available = self.book.crossable_quantity(&order, order.remaining());
            if available < order.remaining() {
                return Err(AddError::InsufficientLiquidity {
                    required: order.remaining(),
                    available,
                });
            }
        }

        self.clock += 1;
        order.accepted_at = self.clock;
        let id = order.id;

        let top_before = self.top_of_book();
        let fills = match self.book.match_incoming(&mut order) {
            Ok(fills) => fills,
            Err(e) => return Err(AddError::Invariant(self.halt(e.to_string()))),
        };
        for fill in &fills {
            self.execute(&order, fill);
        }

        let rests =
            order.remaining() > 0 && order.kind == OrderType::Limit && order.tif == TimeInForce::Gtc;
        if rests {
            let (side, price) = (order.side, order.price);
            if let Err(e) = self.book.insert(order) {
                return Err(AddError::Invariant(self.halt(e.to_string())));
            }
            let (remaining, orders) = self.book.level_info(side, price);
            self.publisher.delta(DeltaKind::Add, side, price, remaining, orders);
        } else if order.remaining() > 0 {
            debug!(
                order_id = id,
                remaining = order.remaining(),
                "unfilled remainder discarded"
            );
        }
        self.publish_best_if_changed(top_before);

        info!(order_id = id, executions = fills.len(), "order accepted");
        Ok(id)
    }

    /// Cancel a resting order.
    pub fn cancel_order(&mut self, id: order::Id) -> Result<(), CancelError> {
        if self.halted {
            return Err(CancelError::Halted);
        }
        let top_before = self.top_of_book();
        let order = self.book.cancel(id).map_err(|_| CancelError::NotFound(id))?;
        let (remaining, orders) = self.book.level_info(order.side, order.price);
        self.publisher
            .delta(DeltaKind::Remove, order.side, order.price, remaining, orders);
        self.publish_best_if_changed(top_before);

        info!(order_id = id, "order cancelled");
        Ok(())
    }

    /// Replace a resting order's price and/or quantity.
    ///
    /// A price-preserving change resizes in place and keeps time priority; if
    /// the new quantity is no more than what has already filled, the order is
    /// treated as fully filled and removed. A price change is an atomic
    /// cancel-then-add with a fresh acceptance stamp: the order loses time
    /// priority and may trade immediately at its new price.
    pub fn modify_order(
        &mut self,
        id: order::Id,
        new_price: Price,
        new_quantity: Quantity,
    ) -> Result<(), ModifyError> {
        if self.halted {
            return Err(ModifyError::Halted);
        }
        let Some(existing) = self.book.get(id) else {
            return Err(ModifyError::NotFound(id));
        };
        if new_quantity == 0 {
            return Err(ModifyError::InvalidModify("quantity must be positive".into()));
        }
        if new_price == 0 {
            return Err(ModifyError::InvalidModify("price must be positive".into()));
        }

        let old_price = existing.price;
        let old_quantity = existing.quantity;
        let old_remaining = existing.remaining();
        let side = existing.side;
        let account = existing.account.clone();
        let new_remaining = new_quantity.saturating_sub(existing.filled);

        self.risk.check_size(new_quantity)?;
        self.risk.check_price(new_price)?;
        if new_remaining > old_remaining {
            // Exposure grows: re-run the worst-case position check as if the
            // modified order fully executed.
            self.risk
                .check_position(&account, &self.symbol, side, new_remaining, &self.portfolio)?;
        }

        if new_price == old_price {
            if new_quantity == old_quantity {
                return Ok(()); // no-op; emits nothing
            }
            let top_before = self.top_of_book();
            match self.book.adjust_quantity(id, new_quantity) {
                Ok(Some(_removed)) => {
                    let (remaining, orders) = self.book.level_info(side, old_price);
                    self.publisher
                        .delta(DeltaKind::Remove, side, old_price, remaining, orders);
                    self.publish_best_if_changed(top_before);
                }
                Ok(None) => {
                    let (remaining, orders) = self.book.level_info(side, old_price);
                    self.publisher
                        .delta(DeltaKind::Modify, side, old_price, remaining, orders);
                }
                Err(e) => return Err(ModifyError::Invariant(self.halt(e.to_string()))),
            }
            info!(order_id = id, new_quantity, "order resized in place");
            return Ok(());
        }

        // Price change: cancel event sequence, then add event sequence.
        let top_before = self.top_of_book();
        let mut order = self.book.cancel(id).map_err(|_| ModifyError::NotFound(id))?;
        let (remaining, orders) = self.book.level_info(side, old_price);
        self.publisher
            .delta(DeltaKind::Remove, side, old_price, remaining, orders);
        self.publish_best_if_changed(top_before);

        order.price = new_price;
        order.quantity = new_quantity;
        if order.filled > order.quantity {
            order.filled = order.quantity;
        }
        self.clock += 1;
        order.accepted_at = self.clock;

        if order.remaining() > 0 {
            let top_before = self.top_of_book();
            let fills = match self.book.match_incoming(&mut order) {
                Ok(fills) => fills,
                Err(e) => return Err(ModifyError::Invariant(self.halt(e.to_string()))),
            };
            for fill in &fills {
                self.execute(&order, fill);
            }
            if order.remaining() > 0 {
                if let Err(e) = self.book.insert(order) {
                    return Err(ModifyError::Invariant(self.halt(e.to_string())));
                }
                let (remaining, orders) = self.book.level_info(side, new_price);
                self.publisher
                    .delta(DeltaKind::Add, side, new_price, remaining, orders);
            }
            self.publish_best_if_changed(top_before);
        }

        info!(order_id = id, new_price, new_quantity, "order re-priced");
        Ok(())
    }

    /// Best bid price, O(1).
    pub fn best_bid(&self) -> Option<Price> {
        self.book.best_price(Side::Buy)
    }

    /// Best ask price, O(1).
    pub fn best_ask(&self) -> Option<Price> {
        self.book.best_price(Side::Sell)
    }

    /// Best level on each side as `(price, aggregate quantity)`.
    pub fn best_levels(&self) -> (Option<(Price, Quantity)>, Option<(Price, Quantity)>) {
        self.top_of_book()
    }

    /// Up to `levels` best price levels per side, best first. Empty levels
    /// never appear.
    pub fn depth(&self, levels: usize) -> Depth {
        self.book.depth(levels)
    }

    /// Borrow a resting order by id.
    pub fn get(&self, id: order::Id) -> Option<&Order> {
        self.book.get(id)
    }

    pub fn order_count(&self) -> usize {
        self.book.order_count()
    }

    pub fn bid_level_count(&self) -> usize {
        self.book.level_count(Side::Buy)
    }

    pub fn ask_level_count(&self) -> usize {
        self.book.level_count(Side::Sell)
    }

    /// Net position for `account` in the engine's symbol.
    pub fn position(&self, account: &str) -> i64 {
        self.portfolio.position(account, &self.symbol)
    }

    /// Total trades executed over the engine's lifetime.
    pub fn trade_count(&self) -> u64 {
        self.last_trade_id
    }

    /// The most recently consumed event sequence number.
    pub fn last_seq(&self) -> Seq {
        self.publisher.last_seq()
    }

    /// Deep-check every structural invariant: per-level aggregates, index
    /// coverage, fill bounds, and that the book is not crossed. Intended for
    /// tests and audits; never fails in normal use.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        self.book.verify().map_err(InvariantViolation)?;
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(InvariantViolation(format!(
                    "book is crossed: best bid {bid} >= best ask {ask}"
                )));
            }
        }
        Ok(())
    }

    fn validate_new(&self, order: &Order) -> Result<(), AddError> {
        if order.quantity == 0 {
            return Err(AddError::InvalidOrder("quantity must be positive".into()));
        }
        if order.filled != 0 {
            return Err(AddError::InvalidOrder("new orders must have no fills".into()));
        }
        if order.symbol.is_empty() {
            return Err(AddError::InvalidOrder("symbol must not be empty".into()));
        }
        if order.symbol.len() > MAX_SYMBOL_LEN {
            return Err(AddError::InvalidOrder("symbol is too long".into()));
        }
        if order.symbol != self.symbol {
            return Err(AddError::InvalidOrder(format!(
                "symbol {} is not traded on this book",
                order.symbol
            )));
        }
        if order.kind == OrderType::Limit && order.price == 0 {
            return Err(AddError::InvalidOrder("limit price must be positive".into()));
        }
        Ok(())
    }

    /// Record one execution: allocate a trade id, update both positions, and
    /// emit the trade followed by the maker's level delta.
    fn execute(&mut self, taker: &Order, fill: &Fill) {
        self.last_trade_id += 1;
        let (buy_order_id, sell_order_id) = match taker.side {
            Side::Buy => (taker.id, fill.maker_id),
            Side::Sell => (fill.maker_id, taker.id),
        };
        let (buyer, seller) = match taker.side {
            Side::Buy => (taker.account.as_str(), fill.maker_account.as_str()),
            Side::Sell => (fill.maker_account.as_str(), taker.account.as_str()),
        };
        self.portfolio
            .apply_fill(buyer, seller, &self.symbol, fill.quantity);

        let trade = Trade {
            id: self.last_trade_id,
            buy_order_id,
            sell_order_id,
            price: fill.price,
            quantity: fill.quantity,
            symbol: self.symbol.clone(),
            timestamp: OffsetDateTime::now_utc(),
        };
        info!(
            trade_id = trade.id,
            buy_order_id,
            sell_order_id,
            price = order::price_to_decimal(fill.price),
            quantity = fill.quantity,
            "trade executed"
        );
        self.publisher.trade(trade);

        let kind = if fill.maker_removed {
            DeltaKind::Remove
        } else {
            DeltaKind::Modify
        };
        self.publisher
            .delta(kind, fill.side, fill.price, fill.level_remaining, fill.level_orders);
    }

    fn top_of_book(&self) -> (Option<(Price, Quantity)>, Option<(Price, Quantity)>) {
        (
            self.book.best_level(Side::Buy),
            self.book.best_level(Side::Sell),
        )
    }

    fn publish_best_if_changed(
        &mut self,
        before: (Option<(Price, Quantity)>, Option<(Price, Quantity)>),
    ) {
        let after = self.top_of_book();
        if after != before {
            self.publisher.best(after.0, after.1);
        }
    }

    fn halt(&mut self, reason: String) -> String {
        self.halted = true;
        tracing::error!(%reason, "engine halted");
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BookDelta;
    use std::sync::{Arc, Mutex};

    const SYMBOL: &str = "XYZ";

    fn px(decimal: f64) -> Price {
        order::price_from_decimal(decimal).unwrap()
    }

    fn engine() -> (Engine, Arc<Mutex<Vec<MarketEvent>>>) {
        engine_with_limits(RiskLimits::default())
    }

    fn engine_with_limits(limits: RiskLimits) -> (Engine, Arc<Mutex<Vec<MarketEvent>>>) {
        let mut engine = Engine::new(SYMBOL, limits);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (engine, events)
    }

    fn limit(id: u64, side: Side, tif: TimeInForce, price: f64, quantity: Quantity) -> Order {
        Order::new(
            id,
            side,
            OrderType::Limit,
            tif,
            px(price),
            quantity,
            SYMBOL.to_string(),
            String::new(),
        )
    }

    fn gtc(id: u64, side: Side, price: f64, quantity: Quantity) -> Order {
        limit(id, side, TimeInForce::Gtc, price, quantity)
    }

    fn market(id: u64, side: Side, quantity: Quantity) -> Order {
        Order::new(
            id,
            side,
            OrderType::Market,
            TimeInForce::Ioc,
            0,
            quantity,
            SYMBOL.to_string(),
            String::new(),
        )
    }

    /// Compact description of an event stream for order-of-events assertions.
    fn tags(events: &[MarketEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                MarketEvent::Trade { .. } => "trade".to_string(),
                MarketEvent::Delta(BookDelta {
                    kind, side, price, ..
                }) => format!("{kind:?}-{side:?}@{price}").to_lowercase(),
                MarketEvent::Best(_) => "best".to_string(),
            })
            .collect()
    }

    fn drain(events: &Arc<Mutex<Vec<MarketEvent>>>) -> Vec<MarketEvent> {
        std::mem::take(&mut *events.lock().unwrap())
    }

    #[test]
    fn rest_and_best_price() {
        let (mut engine, events) = engine();
        engine
            .add_order(gtc(1, Side::Buy, 100.0, 500))
            .expect("resting order should be accepted");

        assert_eq!(engine.best_bid(), Some(px(100.0)));
        assert_eq!(engine.best_ask(), None);
        assert_eq!(engine.best_levels().0, Some((px(100.0), 500)));

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec!["add-buy@10000", "best"],
            "expected an add delta then a best-prices snapshot"
        );
        let seqs: Vec<Seq> = events.iter().map(MarketEvent::seq).collect();
        assert_eq!(seqs, vec![1, 2], "exactly two sequence numbers consumed");
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn cross_fills_taker_and_leaves_maker_partial() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 500)).unwrap();
        drain(&events);

        engine.add_order(gtc(2, Side::Sell, 100.0, 200)).unwrap();

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec!["trade", "modify-buy@10000", "best"],
            "expected trade, maker modify, best snapshot"
        );
        let MarketEvent::Trade { trade, .. } = &events[0] else {
            panic!("first event should be the trade, got {:?}", events[0]);
        };
        assert_eq!(trade.buy_order_id, 1);
        assert_eq!(trade.sell_order_id, 2);
        assert_eq!(trade.price, px(100.0), "trade prices at the maker's level");
        assert_eq!(trade.quantity, 200);

        assert_eq!(engine.get(1).unwrap().remaining(), 300);
        assert!(engine.get(2).is_none(), "fully filled taker is destroyed");
        assert_eq!(engine.best_levels().0, Some((px(100.0), 300)));
        assert_eq!(engine.best_ask(), None);
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn market_sweep_across_two_levels() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(10, Side::Sell, 101.0, 50)).unwrap();
        engine.add_order(gtc(11, Side::Sell, 102.0, 70)).unwrap();
        drain(&events);

        engine.add_order(market(99, Side::Buy, 100)).unwrap();

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec![
                "trade",
                "remove-sell@10100",
                "trade",
                "modify-sell@10200",
                "best"
            ],
            "expected the full sweep event sequence"
        );

        let trades: Vec<&Trade> = events
            .iter()
            .filter_map(|event| match event {
                MarketEvent::Trade { trade, .. } => Some(trade),
                _ => None,
            })
            .collect();
        assert_eq!(trades[0].buy_order_id, 99);
        assert_eq!(trades[0].sell_order_id, 10);
        assert_eq!(trades[0].price, px(101.0));
        assert_eq!(trades[0].quantity, 50);
        assert_eq!(trades[1].sell_order_id, 11);
        assert_eq!(trades[1].price, px(102.0));
        assert_eq!(trades[1].quantity, 50);

        assert!(engine.get(10).is_none(), "id=10 fully filled and removed");
        assert_eq!(engine.get(11).unwrap().remaining(), 20);
        assert_eq!(engine.best_levels().1, Some((px(102.0), 20)));
        assert!(
            engine.get(99).is_none(),
            "market remainder must not rest"
        );
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn fok_with_insufficient_liquidity_is_rejected_without_effects() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Sell, 101.0, 30)).unwrap();
        drain(&events);
        let seq_before = engine.last_seq();

        let err = engine
            .add_order(limit(2, Side::Buy, TimeInForce::Fok, 101.0, 100))
            .unwrap_err();
        assert!(
            matches!(
                err,
                AddError::InsufficientLiquidity {
                    required: 100,
                    available: 30
                }
            ),
            "expected InsufficientLiquidity, got {err:?}"
        );

        assert!(drain(&events).is_empty(), "rejection emits nothing");
        assert_eq!(engine.last_seq(), seq_before, "no sequence consumed");
        assert_eq!(engine.best_levels().1, Some((px(101.0), 30)), "book unchanged");
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn fok_executes_completely_when_liquidity_suffices() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Sell, 101.0, 30)).unwrap();
        engine.add_order(gtc(2, Side::Sell, 102.0, 80)).unwrap();
        drain(&events);

        engine
            .add_order(limit(3, Side::Buy, TimeInForce::Fok, 102.0, 100))
            .expect("fillable FOK should be accepted");

        assert!(engine.get(3).is_none(), "FOK taker never rests");
        assert!(engine.get(1).is_none());
        assert_eq!(engine.get(2).unwrap().remaining(), 10);
        assert_eq!(engine.trade_count(), 2);
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn ioc_matches_then_discards_remainder() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Sell, 101.0, 50)).unwrap();
        drain(&events);

        engine
            .add_order(limit(2, Side::Buy, TimeInForce::Ioc, 102.0, 100))
            .unwrap();

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec!["trade", "remove-sell@10100", "best"],
            "IOC emits its fills but no add delta"
        );
        assert!(engine.get(2).is_none(), "IOC remainder is discarded");
        assert_eq!(engine.order_count(), 0);
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn market_against_empty_side_is_a_quiet_no_op() {
        let (mut engine, events) = engine();
        engine
            .add_order(market(1, Side::Buy, 50))
            .expect("market order against an empty book is accepted");

        assert!(drain(&events).is_empty(), "nothing to report");
        assert_eq!(engine.last_seq(), 0, "no sequence consumed");
        assert_eq!(engine.order_count(), 0, "nothing rests");
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn partial_fill_then_rest_emits_add_after_trades() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Sell, 101.0, 40)).unwrap();
        drain(&events);

        engine.add_order(gtc(2, Side::Buy, 101.0, 100)).unwrap();

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec!["trade", "remove-sell@10100", "add-buy@10100", "best"],
            "remainder rests on its own side after the fills"
        );
        assert_eq!(engine.get(2).unwrap().remaining(), 60);
        assert_eq!(engine.best_levels().0, Some((px(101.0), 60)));
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn modify_in_place_keeps_time_priority() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 200)).unwrap(); // A
        engine.add_order(gtc(2, Side::Buy, 100.0, 300)).unwrap(); // B
        drain(&events);

        engine
            .modify_order(1, px(100.0), 250)
            .expect("in-place resize should succeed");

        let emitted = drain(&events);
        assert_eq!(
            tags(&emitted),
            vec!["modify-buy@10000"],
            "price-preserving modify emits exactly one modify delta"
        );
        assert_eq!(engine.best_levels().0, Some((px(100.0), 550)));

        // A must still be at the head: the next sell trades against it.
        engine.add_order(gtc(3, Side::Sell, 100.0, 10)).unwrap();
        let emitted = drain(&events);
        let MarketEvent::Trade { trade, .. } = &emitted[0] else {
            panic!("expected a trade, got {:?}", emitted[0]);
        };
        assert_eq!(trade.buy_order_id, 1, "A kept its queue position");
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn modify_with_price_change_loses_priority() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 250)).unwrap(); // A
        engine.add_order(gtc(2, Side::Buy, 100.0, 300)).unwrap(); // B
        drain(&events);
        let stamp_before = engine.get(1).unwrap().accepted_at;

        engine
            .modify_order(1, px(100.5), 250)
            .expect("re-price should succeed");

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec!["remove-buy@10000", "best", "add-buy@10050", "best"],
            "re-price is a cancel sequence followed by an add sequence"
        );

        let moved = engine.get(1).unwrap();
        assert_eq!(moved.price, px(100.5));
        assert!(
            moved.accepted_at > stamp_before,
            "re-priced order gets a fresh acceptance stamp"
        );
        let depth = engine.depth(10);
        assert_eq!(depth.bids[0].price, px(100.5));
        assert_eq!(depth.bids[0].quantity, 250);
        assert_eq!(depth.bids[0].orders, 1);
        assert_eq!(depth.bids[1].price, px(100.0));
        assert_eq!(depth.bids[1].quantity, 300, "only B remains at 100.0");
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn modify_price_change_can_trade_immediately() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 50)).unwrap();
        engine.add_order(gtc(2, Side::Sell, 101.0, 50)).unwrap();
        drain(&events);

        // Re-price the bid through the ask; the add leg must match.
        engine.modify_order(1, px(101.0), 50).unwrap();

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec![
                "remove-buy@10000",
                "best",
                "trade",
                "remove-sell@10100",
                "best"
            ],
            "the add leg of the re-price crosses and trades"
        );
        assert_eq!(engine.order_count(), 0, "both sides fully filled");
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn modify_below_filled_removes_the_order() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 100)).unwrap();
        engine.add_order(gtc(2, Side::Sell, 100.0, 40)).unwrap(); // fills A to 40
        drain(&events);

        engine
            .modify_order(1, px(100.0), 30)
            .expect("shrinking below filled is a removal, not an error");

        let events = drain(&events);
        assert_eq!(
            tags(&events),
            vec!["remove-buy@10000", "best"],
            "removal behaves like a cancel"
        );
        assert!(engine.get(1).is_none());
        assert_eq!(engine.order_count(), 0);
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn modify_with_unchanged_values_is_a_no_op() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 200)).unwrap();
        drain(&events);
        let seq_before = engine.last_seq();

        engine.modify_order(1, px(100.0), 200).unwrap();

        assert!(drain(&events).is_empty(), "no-op modifies emit nothing");
        assert_eq!(engine.last_seq(), seq_before);
    }

    #[test]
    fn risk_rejects_oversize_order() {
        let (mut engine, events) = engine_with_limits(RiskLimits {
            max_order_size: 1_000,
            ..RiskLimits::default()
        });

        let err = engine.add_order(gtc(1, Side::Buy, 100.0, 1_001)).unwrap_err();
        assert!(
            matches!(err, AddError::RiskRejected(Violation::OrderTooLarge { .. })),
            "expected a size rejection, got {err:?}"
        );
        assert!(drain(&events).is_empty(), "rejection emits nothing");
        assert_eq!(engine.order_count(), 0, "book unchanged");
        assert_eq!(engine.last_seq(), 0);
    }

    #[test]
    fn risk_rejects_position_breach_using_worst_case() {
        let (mut engine, _) = engine_with_limits(RiskLimits {
            max_position: 100,
            ..RiskLimits::default()
        });

        engine.add_order(gtc(1, Side::Buy, 100.0, 80)).unwrap();
        let mut counter = gtc(2, Side::Sell, 100.0, 80);
        counter.account = "other".to_string();
        engine.add_order(counter).unwrap();
        assert_eq!(engine.position(DEFAULT_ACCOUNT), 80);

        // Another 30 would take the default account to 110 on full execution.
        let err = engine.add_order(gtc(3, Side::Buy, 100.0, 30)).unwrap_err();
        assert!(
            matches!(err, AddError::RiskRejected(Violation::PositionLimit { .. })),
            "expected a position rejection, got {err:?}"
        );
    }

    #[test]
    fn modify_that_increases_exposure_is_risk_checked() {
        let (mut engine, _) = engine_with_limits(RiskLimits {
            max_position: 100,
            ..RiskLimits::default()
        });
        engine.add_order(gtc(1, Side::Buy, 100.0, 90)).unwrap();

        let err = engine.modify_order(1, px(100.0), 150).unwrap_err();
        assert!(
            matches!(err, ModifyError::RiskRejected(Violation::PositionLimit { .. })),
            "expected a position rejection, got {err:?}"
        );
        assert_eq!(
            engine.get(1).unwrap().quantity,
            90,
            "rejected modify leaves the order untouched"
        );

        engine
            .modify_order(1, px(100.0), 50)
            .expect("shrinking exposure needs no position check");
    }

    #[test]
    fn duplicate_ids_are_rejected_while_resident() {
        let (mut engine, _) = engine();
        engine.add_order(gtc(7, Side::Buy, 100.0, 10)).unwrap();

        let err = engine.add_order(gtc(7, Side::Sell, 101.0, 10)).unwrap_err();
        assert!(matches!(err, AddError::DuplicateId(7)), "got {err:?}");

        // Once gone, the id may be reused.
        engine.cancel_order(7).unwrap();
        engine
            .add_order(gtc(7, Side::Buy, 100.0, 10))
            .expect("id is free again after cancel");
    }

    #[test]
    fn invalid_orders_are_rejected_up_front() {
        let (mut engine, events) = engine();

        let err = engine.add_order(gtc(1, Side::Buy, 100.0, 0)).unwrap_err();
        assert!(matches!(err, AddError::InvalidOrder(_)), "zero quantity: {err:?}");

        let err = engine.add_order(gtc(2, Side::Buy, 0.0, 10)).unwrap_err();
        assert!(matches!(err, AddError::InvalidOrder(_)), "zero price: {err:?}");

        let mut wrong_symbol = gtc(3, Side::Buy, 100.0, 10);
        wrong_symbol.symbol = "OTHER".to_string();
        let err = engine.add_order(wrong_symbol).unwrap_err();
        assert!(matches!(err, AddError::InvalidOrder(_)), "wrong symbol: {err:?}");

        let mut prefilled = gtc(4, Side::Buy, 100.0, 10);
        prefilled.filled = 1;
        let err = engine.add_order(prefilled).unwrap_err();
        assert!(matches!(err, AddError::InvalidOrder(_)), "prefilled: {err:?}");

        assert!(drain(&events).is_empty(), "rejections emit nothing");
        assert_eq!(engine.last_seq(), 0);
    }

    #[test]
    fn cancel_and_modify_of_unknown_ids_fail() {
        let (mut engine, _) = engine();
        assert!(matches!(
            engine.cancel_order(42).unwrap_err(),
            CancelError::NotFound(42)
        ));
        assert!(matches!(
            engine.modify_order(42, px(100.0), 10).unwrap_err(),
            ModifyError::NotFound(42)
        ));
    }

    #[test]
    fn add_then_cancel_behind_the_best_restores_the_book() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 101.0, 100)).unwrap();
        engine.add_order(gtc(2, Side::Sell, 103.0, 100)).unwrap();
        drain(&events);

        let best_before = engine.best_levels();
        let depth_before = engine.depth(10);
        let seq_before = engine.last_seq();

        // An order behind the best never moves the top of book.
        engine.add_order(gtc(3, Side::Buy, 100.0, 50)).unwrap();
        engine.cancel_order(3).unwrap();

        assert_eq!(engine.best_levels(), best_before);
        let depth_after = engine.depth(10);
        assert_eq!(depth_after.bids, depth_before.bids);
        assert_eq!(depth_after.asks, depth_before.asks);
        assert_eq!(
            engine.last_seq(),
            seq_before + 2,
            "one add delta plus one remove delta, nothing else"
        );
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn modify_round_trip_restores_aggregates() {
        let (mut engine, _) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 200)).unwrap();
        engine.add_order(gtc(2, Side::Buy, 100.0, 300)).unwrap();
        let depth_before = engine.depth(10);

        engine.modify_order(1, px(100.5), 250).unwrap();
        engine.modify_order(1, px(100.0), 200).unwrap();

        let depth_after = engine.depth(10);
        assert_eq!(
            depth_after.bids, depth_before.bids,
            "aggregates match even though id=1 lost time priority"
        );
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn self_trading_is_not_prevented() {
        let (mut engine, _) = engine();
        let mut bid = gtc(1, Side::Buy, 100.0, 50);
        bid.account = "alice".to_string();
        let mut ask = gtc(2, Side::Sell, 100.0, 50);
        ask.account = "alice".to_string();

        engine.add_order(bid).unwrap();
        engine.add_order(ask).unwrap();

        assert_eq!(engine.trade_count(), 1, "same-account orders may match");
        assert_eq!(engine.position("alice"), 0, "self-trade nets flat");
    }

    #[test]
    fn sequences_stay_contiguous_across_operations_and_failures() {
        let (mut engine, events) = engine();
        engine.add_order(gtc(1, Side::Buy, 100.0, 100)).unwrap();
        let _ = engine.add_order(gtc(1, Side::Buy, 100.0, 100)); // duplicate
        engine.add_order(gtc(2, Side::Sell, 100.0, 40)).unwrap();
        let _ = engine.cancel_order(999); // unknown
        engine.cancel_order(1).unwrap();

        let events = drain(&events);
        let seqs: Vec<Seq> = events.iter().map(MarketEvent::seq).collect();
        let expected: Vec<Seq> = (1..=seqs.len() as Seq).collect();
        assert_eq!(seqs, expected, "failures must not consume sequence numbers");
        engine.verify().expect("invariants should hold");
    }

    #[test]
    fn book_never_crossed_after_any_workout() {
        let (mut engine, _) = engine();
        engine.add_order(gtc(1, Side::Buy, 99.0, 100)).unwrap();
        engine.add_order(gtc(2, Side::Buy, 100.0, 100)).unwrap();
        engine.add_order(gtc(3, Side::Sell, 101.0, 100)).unwrap();
        engine.add_order(gtc(4, Side::Sell, 102.0, 100)).unwrap();
        engine.verify().expect("setup verifies");

        engine.add_order(gtc(5, Side::Buy, 101.5, 150)).unwrap();
        engine.verify().expect("still verifies after a cross");

        engine.add_order(market(6, Side::Sell, 120)).unwrap();
        engine.verify().expect("still verifies after a market sweep");

        engine.modify_order(4, px(101.0), 60).unwrap();
        engine.verify().expect("still verifies after a re-price");

        if let (Some(bid), Some(ask)) = (engine.best_bid(), engine.best_ask()) {
            assert!(bid < ask, "book must never remain crossed");
        }
    }
}
