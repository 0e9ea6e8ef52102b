//! Price-time priority book for a single symbol.
//!
//! Two `BTreeMap`s hold the non-empty price levels: bids are keyed ascending
//! with the best (highest) at the back, asks with the best (lowest) at the
//! front, so best access is O(1) amortized and by-price lookup is a tree walk
//! on the same structure that keeps the ladder sorted. Each level maintains a
//! FIFO queue of orders as an intrusive doubly-linked list of indices into a
//! shared slab arena, which makes cancel and head consumption O(1) given a
//! handle. A hash map from order id to slab index is the single authority on
//! which orders are resident.

use crate::order::{Id, Order, Price, Quantity, Side};
use slab::Slab;
use std::cmp;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Aggregated view of one price level as reported by depth queries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DepthLevel {
    pub price: Price,
    /// Total remaining quantity across the level's queue.
    pub quantity: Quantity,
    /// Number of resting orders in the queue.
    pub orders: usize,
}

/// Best price levels on both sides, best first.
#[derive(Debug, Clone, Default)]
pub struct Depth {
    /// Bids in descending price order.
    pub bids: Vec<DepthLevel>,
    /// Asks in ascending price order.
    pub asks: Vec<DepthLevel>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not find order with id #{0}")]
    /// Tried to operate on an order that is not resident.
    OrderIdNotFound(Id),
    #[error("another order with the same id #{0} is already resident")]
    /// Tried to rest an order whose id is already resident.
    OrderIdExists(Id),
    #[error("book state is corrupted: {0}")]
    /// A structural invariant no longer holds. Fatal to the owning engine.
    Corrupted(&'static str),
}

/// One execution produced while matching an incoming order.
///
/// Everything the caller needs to build the trade record and the book-delta
/// event without re-querying the level afterwards.
#[derive(Debug, Clone)]
pub struct Fill {
    pub maker_id: Id,
    pub maker_account: String,
    /// Side the maker was resting on.
    pub side: Side,
    /// Execution price: the maker's level price.
    pub price: Price,
    pub quantity: Quantity,
    /// Maker's remaining quantity after this execution.
    pub maker_remaining: Quantity,
    /// Level aggregate quantity after this execution.
    pub level_remaining: Quantity,
    /// Level order count after this execution.
    pub level_orders: usize,
    /// Whether the maker was fully filled and destroyed.
    pub maker_removed: bool,
}

/// Node holding one resting order, linked into its level's FIFO queue.
#[derive(Debug)]
struct OrderNode {
    order: Order,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Aggregated state for a single price level: the head/tail of the queue plus
/// cumulative quantity and order count for O(1) depth reads.
#[derive(Debug, Default)]
struct PriceLevel {
    head: Option<usize>,
    tail: Option<usize>,
    total_quantity: Quantity,
    order_count: usize,
}

impl PriceLevel {
    /// Append a node at the back of the queue and update aggregates.
    /// `idx` must reference a valid, unlinked entry in `arena`.
    fn push(&mut self, arena: &mut Slab<OrderNode>, idx: usize) {
        match self.tail {
            Some(tail) => {
                arena[tail].next = Some(idx);
                arena[idx].prev = Some(tail);
                self.tail = Some(idx);
            }
            None => {
                self.head = Some(idx);
                self.tail = Some(idx);
                arena[idx].prev = None;
            }
        }

        self.total_quantity += arena[idx].order.remaining();
        self.order_count += 1;
    }

    /// Unlink a node currently in this queue and update aggregates.
    fn unlink(&mut self, arena: &mut Slab<OrderNode>, idx: usize) {
        let prev = arena[idx].prev;
        let next = arena[idx].next;

        if let Some(p) = prev {
            arena[p].next = next;
        } else {
            self.head = next;
        }
        if let Some(n) = next {
            arena[n].prev = prev;
        } else {
            self.tail = prev;
        }
        self.order_count -= 1;
        self.total_quantity -= arena[idx].order.remaining();
        arena[idx].prev = None;
        arena[idx].next = None;
    }
}

/// The book proper: two ladders, the order arena, and the id index.
#[derive(Debug, Default)]
pub struct Book {
    bids: BTreeMap<Price, PriceLevel>,
    asks: BTreeMap<Price, PriceLevel>,
    arena: Slab<OrderNode>,
    index: HashMap<Id, usize>,
}

impl Book {
    pub fn new() -> Self {
        Book::default()
    }

    /// Create a book with space pre-allocated for `capacity` resting orders.
    pub fn with_capacity(capacity: usize) -> Self {
        Book {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            arena: Slab::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Whether an order with this id is currently resident.
    pub fn contains(&self, id: Id) -> bool {
        self.index.contains_key(&id)
    }

    /// Borrow a resident order by id.
    pub fn get(&self, id: Id) -> Option<&Order> {
        let idx = self.index.get(&id)?;
        Some(&self.arena[*idx].order)
    }

    /// Number of resident orders across both sides.
    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    /// Number of non-empty price levels on `side`.
    pub fn level_count(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    /// Best price and its aggregate quantity on `side`, if any level rests.
    pub fn best_level(&self, side: Side) -> Option<(Price, Quantity)> {
        match side {
            Side::Buy => self.bids.last_key_value(),
            Side::Sell => self.asks.first_key_value(),
        }
        .map(|(price, level)| (*price, level.total_quantity))
    }

    pub fn best_price(&self, side: Side) -> Option<Price> {
        self.best_level(side).map(|(price, _)| price)
    }

    /// Aggregate `(quantity, order count)` at a price, `(0, 0)` when no level
    /// rests there. Describes a level right after a mutation.
    pub fn level_info(&self, side: Side, price: Price) -> (Quantity, usize) {
        let level = match side {
            Side::Buy => self.bids.get(&price),
            Side::Sell => self.asks.get(&price),
        };
        level.map_or((0, 0), |l| (l.total_quantity, l.order_count))
    }

    /// Rest an order at its price level, creating the level if needed.
    /// The order joins the back of the queue (time priority).
    pub fn insert(&mut self, order: Order) -> Result<(), Error> {
        if self.index.contains_key(&order.id) {
            return Err(Error::OrderIdExists(order.id));
        }

        let id = order.id;
        let side = order.side;
        let price = order.price;
        let idx = self.arena.insert(OrderNode {
            order,
            prev: None,
            next: None,
        });
        self.index.insert(id, idx);
        let level = match side {
            Side::Buy => self.bids.entry(price).or_default(),
            Side::Sell => self.asks.entry(price).or_default(),
        };
        level.push(&mut self.arena, idx);

        Ok(())
    }

    /// Remove a resting order by id, returning it.
    pub fn cancel(&mut self, id: Id) -> Result<Order, Error> {
        let Some(&idx) = self.index.get(&id) else {
            return Err(Error::OrderIdNotFound(id));
        };
        Ok(self.remove_from_level(idx))
    }

    /// Change a resting order's quantity in place, preserving its queue
    /// position and adjusting the level aggregate by the remaining delta.
    ///
    /// When the new quantity does not exceed what has already been filled the
    /// order counts as fully filled: it is removed and `filled` is clamped to
    /// the new quantity so the fill invariant holds. Returns the removed
    /// order in that case, `None` for a plain resize.
    pub fn adjust_quantity(
        &mut self,
        id: Id,
        new_quantity: Quantity,
    ) -> Result<Option<Order>, Error> {
        let Some(&idx) = self.index.get(&id) else {
            return Err(Error::OrderIdNotFound(id));
        };

        if new_quantity <= self.arena[idx].order.filled {
            let mut order = self.remove_from_level(idx);
            order.quantity = new_quantity;
            order.filled = new_quantity;
            return Ok(Some(order));
        }

        let order = &mut self.arena[idx].order;
        let old_remaining = order.remaining();
        order.quantity = new_quantity;
        let new_remaining = order.remaining();
        let side = order.side;
        let price = order.price;

        let level = match side {
            Side::Buy => self.bids.get_mut(&price),
            Side::Sell => self.asks.get_mut(&price),
        };
        let level = level.unwrap();
        level.total_quantity = level.total_quantity - old_remaining + new_remaining;
        Ok(None)
    }

    /// Total quantity immediately tradeable against `taker`, scanning levels
    /// best-first and stopping once `cap` is reached. Used for the two-pass
    /// fill-or-kill admission check.
    pub fn crossable_quantity(&self, taker: &Order, cap: Quantity) -> Quantity {
        let mut available: Quantity = 0;
        match taker.side {
            Side::Buy => {
                for (price, level) in self.asks.iter() {
                    if available >= cap || !taker.crosses(*price) {
                        break;
                    }
                    available = available.saturating_add(level.total_quantity);
                }
            }
            Side::Sell => {
                for (price, level) in self.bids.iter().rev() {
                    if available >= cap || !taker.crosses(*price) {
                        break;
                    }
                    available = available.saturating_add(level.total_quantity);
                }
            }
        }
        available
    }

    /// Drive an incoming order against the opposite ladder.
    ///
    /// Levels are consumed best-first and each level head-first, so better
    /// prices execute before worse ones and earlier orders before later ones.
    /// Trades price at the maker's level. Fully filled makers are destroyed;
    /// emptied levels are dropped before returning. The taker is left with
    /// whatever could not execute; resting it (or not) is the caller's call.
    pub fn match_incoming(&mut self, taker: &mut Order) -> Result<Vec<Fill>, Error> {
        let mut fills = Vec::new();
        while taker.remaining() > 0 {
            let maker_side = taker.side.opposite();
            let Some(level_price) = self.best_price(maker_side) else {
                break;
            };
            if !taker.crosses(level_price) {
                break;
            }
            self.consume_level(maker_side, level_price, taker, &mut fills)?;
        }
        Ok(fills)
    }

    /// Consume from the head of one level until it empties or the taker is
    /// satisfied, appending one `Fill` per execution.
    fn consume_level(
        &mut self,
        maker_side: Side,
        price: Price,
        taker: &mut Order,
        fills: &mut Vec<Fill>,
    ) -> Result<(), Error> {
        let levels = match maker_side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let arena = &mut self.arena;
        let index = &mut self.index;
        let Some(level) = levels.get_mut(&price) else {
            return Err(Error::Corrupted("best price has no level"));
        };

        while taker.remaining() > 0 {
            let Some(head) = level.head else { break };
            let quantity = cmp::min(taker.remaining(), arena[head].order.remaining());
            if quantity == 0 {
                return Err(Error::Corrupted("resident order with zero remaining"));
            }

            arena[head].order.filled += quantity;
            taker.filled += quantity;
            level.total_quantity -= quantity;

            let maker = &arena[head].order;
            let maker_id = maker.id;
            let maker_account = maker.account.clone();
            let maker_remaining = maker.remaining();
            let maker_removed = maker_remaining == 0;
            if maker_removed {
                level.unlink(arena, head);
                let node = arena.remove(head);
                index.remove(&node.order.id);
            }

            fills.push(Fill {
                maker_id,
                maker_account,
                side: maker_side,
                price,
                quantity,
                maker_remaining,
                level_remaining: level.total_quantity,
                level_orders: level.order_count,
                maker_removed,
            });
        }

        if level.order_count == 0 {
            levels.remove(&price);
        }
        Ok(())
    }

    /// Snapshot of the best `limit` levels per side, best first.
    pub fn depth(&self, limit: usize) -> Depth {
        Depth {
            bids: self
                .bids
                .iter()
                .rev()
                .take(limit)
                .map(|(price, level)| DepthLevel {
                    price: *price,
                    quantity: level.total_quantity,
                    orders: level.order_count,
                })
                .collect(),
            asks: self
                .asks
                .iter()
                .take(limit)
                .map(|(price, level)| DepthLevel {
                    price: *price,
                    quantity: level.total_quantity,
                    orders: level.order_count,
                })
                .collect(),
        }
    }

    /// Walk the entire structure checking every book invariant: aggregates
    /// equal the queue sums, no empty levels exist, the id index covers the
    /// resident set exactly, queue links are consistent, and every resident
    /// order has remaining quantity and `filled <= quantity`.
    pub fn verify(&self) -> Result<(), String> {
        let mut resident = 0usize;
        for (side, levels) in [(Side::Buy, &self.bids), (Side::Sell, &self.asks)] {
            for (price, level) in levels.iter() {
                if level.order_count == 0 {
                    return Err(format!("empty {side:?} level at {price}"));
                }
                let mut quantity: Quantity = 0;
                let mut count = 0usize;
                let mut prev: Option<usize> = None;
                let mut cursor = level.head;
                while let Some(idx) = cursor {
                    let Some(node) = self.arena.get(idx) else {
                        return Err(format!("dangling node {idx} in {side:?} level {price}"));
                    };
                    if node.prev != prev {
                        return Err(format!("broken back link in {side:?} level {price}"));
                    }
                    let order = &node.order;
                    if order.filled > order.quantity {
                        return Err(format!("order #{} overfilled", order.id));
                    }
                    if order.remaining() == 0 {
                        return Err(format!("order #{} resident with zero remaining", order.id));
                    }
                    if order.side != side || order.price != *price {
                        return Err(format!("order #{} linked into the wrong level", order.id));
                    }
                    if self.index.get(&order.id) != Some(&idx) {
                        return Err(format!("order #{} not tracked by the index", order.id));
                    }
                    quantity += order.remaining();
                    count += 1;
                    prev = cursor;
                    cursor = node.next;
                }
                if level.tail != prev {
                    return Err(format!("tail mismatch in {side:?} level {price}"));
                }
                if quantity != level.total_quantity {
                    return Err(format!(
                        "{side:?} level {price} aggregate {} != queue sum {quantity}",
                        level.total_quantity
                    ));
                }
                if count != level.order_count {
                    return Err(format!(
                        "{side:?} level {price} order count {} != queue length {count}",
                        level.order_count
                    ));
                }
                resident += count;
            }
        }
        if resident != self.index.len() {
            return Err(format!(
                "index tracks {} orders but {resident} are resident",
                self.index.len()
            ));
        }
        Ok(())
    }

    /// Remove an order (by slab index) from its level, dropping the level if
    /// it empties, and delete it from the arena and index.
    fn remove_from_level(&mut self, idx: usize) -> Order {
        let side = self.arena[idx].order.side;
        let price = self.arena[idx].order.price;

        let level = match side {
            Side::Buy => self.bids.get_mut(&price).unwrap(),
            Side::Sell => self.asks.get_mut(&price).unwrap(),
        };
        level.unlink(&mut self.arena, idx);
        if level.order_count == 0 {
            match side {
                Side::Buy => self.bids.remove(&price),
                Side::Sell => self.asks.remove(&price),
            };
        }

        let node = self.arena.remove(idx);
        self.index.remove(&node.order.id);
        node.order
    }
}
