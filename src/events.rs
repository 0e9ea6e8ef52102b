//! Sequenced market-data events and their publisher.
//!
//! Every observable state change produces events: one `Trade` per execution,
//! a `BookDelta` per resting-state change, and a `BestPrices` snapshot when
//! the top of either side moved. Each event consumes the next sequence number
//! in the order it is produced, so subscribers detect gaps by non-contiguous
//! sequences. Delivery is synchronous on the engine thread; a panicking
//! subscriber is isolated at the publisher boundary, logged, and skipped.

use crate::order::{Price, Quantity, Side};
use crate::trade::Trade;
use std::panic::{catch_unwind, AssertUnwindSafe};
use time::OffsetDateTime;
use tracing::error;

/// Event sequence number. Strictly monotonic with step 1, starting at 1,
/// never reused. Failed or no-op operations consume none.
pub type Seq = u64;

/// The kind of change a book delta describes at a `(side, price)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeltaKind {
    /// An order came to rest.
    Add,
    /// A resting order's remaining quantity changed.
    Modify,
    /// A resting order left the level.
    Remove,
}

/// Minimal description of one resting-state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDelta {
    pub kind: DeltaKind,
    pub side: Side,
    pub price: Price,
    /// Aggregate quantity remaining at the level after the change.
    pub remaining: Quantity,
    /// Number of orders at the level after the change.
    pub orders: usize,
    pub seq: Seq,
}

/// Top-of-book snapshot for both sides. Sizes read zero when a side is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPrices {
    pub bid: Option<Price>,
    pub bid_size: Quantity,
    pub ask: Option<Price>,
    pub ask_size: Quantity,
    pub timestamp: OffsetDateTime,
    pub seq: Seq,
}

#[derive(Debug, Clone)]
pub enum MarketEvent {
    Trade { trade: Trade, seq: Seq },
    Delta(BookDelta),
    Best(BestPrices),
}

impl MarketEvent {
    pub fn seq(&self) -> Seq {
        match self {
            MarketEvent::Trade { seq, .. } => *seq,
            MarketEvent::Delta(delta) => delta.seq,
            MarketEvent::Best(best) => best.seq,
        }
    }
}

type Subscriber = Box<dyn FnMut(&MarketEvent) + Send>;

/// Holds the sequence counter and fans events out to subscribers.
pub struct Publisher {
    last_seq: Seq,
    subscribers: Vec<Subscriber>,
}

impl Default for Publisher {
    fn default() -> Self {
        Publisher::new()
    }
}

impl Publisher {
    pub fn new() -> Self {
        Publisher {
            last_seq: 0,
            subscribers: Vec::new(),
        }
    }

    /// Register a subscriber. Intended to happen before any events flow;
    /// a late subscriber simply misses earlier sequences.
    pub fn subscribe(&mut self, subscriber: impl FnMut(&MarketEvent) + Send + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// The most recently consumed sequence number, 0 before any event.
    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    /// Publish one trade execution.
    pub fn trade(&mut self, trade: Trade) {
        let seq = self.next_seq();
        self.dispatch(MarketEvent::Trade { trade, seq });
    }

    /// Publish one resting-state change at a `(side, price)`.
    pub fn delta(
        &mut self,
        kind: DeltaKind,
        side: Side,
        price: Price,
        remaining: Quantity,
        orders: usize,
    ) {
        let seq = self.next_seq();
        self.dispatch(MarketEvent::Delta(BookDelta {
            kind,
            side,
            price,
            remaining,
            orders,
            seq,
        }));
    }

    /// Publish a top-of-book snapshot.
    pub fn best(&mut self, bid: Option<(Price, Quantity)>, ask: Option<(Price, Quantity)>) {
        let seq = self.next_seq();
        self.dispatch(MarketEvent::Best(BestPrices {
            bid: bid.map(|(price, _)| price),
            bid_size: bid.map_or(0, |(_, size)| size),
            ask: ask.map(|(price, _)| price),
            ask_size: ask.map_or(0, |(_, size)| size),
            timestamp: OffsetDateTime::now_utc(),
            seq,
        }));
    }

    fn next_seq(&mut self) -> Seq {
        self.last_seq += 1;
        self.last_seq
    }

    fn dispatch(&mut self, event: MarketEvent) {
        for subscriber in self.subscribers.iter_mut() {
            // A subscriber failure must not corrupt engine state or starve
            // the remaining subscribers.
            if catch_unwind(AssertUnwindSafe(|| subscriber(&event))).is_err() {
                error!(seq = event.seq(), "market data subscriber panicked");
            }
        }
    }
}
