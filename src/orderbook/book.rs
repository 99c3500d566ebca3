//! Level-3 order book.
//!
//! Every resting order is kept individually:
//!
//! - one [`PriceOrderedStore`] per side, keyed by (price, arrival, order id)
//! - an order-id index locating each order in its side store
//!
//! Both stores and the index change together in every mutating call, so an
//! order is reachable from exactly one side store and the index, or from
//! neither.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use super::store::{AskKey, BidKey, PriceOrderedStore, SideKey};
use crate::error::Error;
use crate::types::{BookEntry, DepthResponse, FullOrderBook, Order, PriceLevel, Side};
use crate::Result;

/// Where an indexed order lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderLocation {
    side: Side,
    price: Decimal,
    time: u64,
}

/// Full-depth order book for a single symbol.
///
/// # Design Decisions
///
/// 1. **Exact decimals**: prices and sizes are `rust_decimal::Decimal`, so
///    `1.50` and `1.5` compare equal and no rounding ever creeps in.
///
/// 2. **Composite keys**: orders at the same price keep arrival order because
///    the arrival time is part of the key.
///
/// 3. **FxHashMap index**: order ids are short strings; lookups by id are the
///    hot path for done/match/update deltas.
///
/// # Thread Safety
///
/// This struct is `Send + Sync` but not internally synchronized. The
/// [`Builder`](super::Builder) wraps it in a `parking_lot::RwLock`.
///
/// # Example
///
/// ```rust
/// use kucoin_level3::orderbook::OrderBook;
/// use kucoin_level3::types::{Order, Side};
/// use rust_decimal::Decimal;
///
/// let mut book = OrderBook::new();
/// book.add_order(Order::new("A1", Side::Buy, Decimal::new(1000, 2), Decimal::from(5), 1))?;
/// assert_eq!(book.best_bid().map(|o| o.order_id.as_str()), Some("A1"));
///
/// book.remove_by_order_id("A1");
/// assert!(book.is_empty());
/// # Ok::<(), kucoin_level3::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Version of the whole book
    sequence: u64,

    /// Sell orders, lowest price first
    asks: PriceOrderedStore<AskKey, Order>,

    /// Buy orders, highest price first
    bids: PriceOrderedStore<BidKey, Order>,

    /// Order id -> location in `asks` or `bids`
    index: FxHashMap<String, OrderLocation>,
}

impl OrderBook {
    /// Create an empty book at sequence 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from a venue snapshot.
    ///
    /// The book takes the snapshot's sequence and every entry is added as a
    /// resting order.
    ///
    /// # Errors
    ///
    /// Fails on an empty sequence, an unparseable entry, or an order id that
    /// appears twice.
    pub fn from_depth(depth: &DepthResponse) -> Result<Self> {
        let mut book = Self::new();
        book.sequence = depth.sequence()?;
        for side in [Side::Sell, Side::Buy] {
            for order in depth.orders(side)? {
                book.add_order(order)?;
            }
        }
        Ok(book)
    }

    /// Get the current sequence number
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Set the sequence number
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Add a resting order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateOrder`] if the id is already resting and
    /// [`Error::Protocol`] for a non-positive size. The book is unchanged on
    /// error.
    pub fn add_order(&mut self, order: Order) -> Result<()> {
        if self.index.contains_key(&order.order_id) {
            return Err(Error::DuplicateOrder(order.order_id));
        }
        if order.size <= Decimal::ZERO {
            return Err(Error::Protocol(format!(
                "order {} added with size {}",
                order.order_id, order.size
            )));
        }

        let location = OrderLocation {
            side: order.side,
            price: order.price,
            time: order.time,
        };
        self.index.insert(order.order_id.clone(), location);
        match order.side {
            Side::Sell => {
                let key = AskKey::new(order.price, order.time, &order.order_id);
                self.asks.insert(key, order);
            }
            Side::Buy => {
                let key = BidKey::new(order.price, order.time, &order.order_id);
                self.bids.insert(key, order);
            }
        }
        Ok(())
    }

    /// Remove an order by id.
    ///
    /// Unknown ids are a no-op: a `done` often arrives after a match already
    /// took the order to zero.
    pub fn remove_by_order_id(&mut self, order_id: &str) -> Option<Order> {
        let location = self.index.remove(order_id)?;
        match location.side {
            Side::Sell => self
                .asks
                .remove(&AskKey::new(location.price, location.time, order_id)),
            Side::Buy => self
                .bids
                .remove(&BidKey::new(location.price, location.time, order_id)),
        }
    }

    /// Subtract a filled quantity from a resting order.
    ///
    /// An order filled down to exactly zero is removed. Unknown ids are a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeSize`] if the fill exceeds the resting size;
    /// the order is left untouched.
    pub fn match_order(&mut self, order_id: &str, filled: Decimal) -> Result<()> {
        let Some(current) = self.get_order(order_id).map(|o| o.size) else {
            return Ok(());
        };
        let remaining = current - filled;
        if remaining < Decimal::ZERO {
            return Err(Error::NegativeSize {
                order_id: order_id.to_string(),
                size: current,
                filled,
            });
        }
        self.resize_order(order_id, remaining)
    }

    /// Set the remaining size of a resting order.
    ///
    /// A size of exactly zero removes the order. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeSize`] for a negative size.
    pub fn resize_order(&mut self, order_id: &str, size: Decimal) -> Result<()> {
        let Some(location) = self.index.get(order_id).copied() else {
            return Ok(());
        };
        if size < Decimal::ZERO {
            return Err(Error::NegativeSize {
                order_id: order_id.to_string(),
                size,
                filled: Decimal::ZERO,
            });
        }
        if size.is_zero() {
            self.remove_by_order_id(order_id);
            return Ok(());
        }

        let order = match location.side {
            Side::Sell => self
                .asks
                .get_mut(&AskKey::new(location.price, location.time, order_id)),
            Side::Buy => self
                .bids
                .get_mut(&BidKey::new(location.price, location.time, order_id)),
        };
        if let Some(order) = order {
            order.size = size;
        }
        Ok(())
    }

    /// Look up a resting order
    #[must_use]
    pub fn get_order(&self, order_id: &str) -> Option<&Order> {
        let location = self.index.get(order_id)?;
        match location.side {
            Side::Sell => self
                .asks
                .get(&AskKey::new(location.price, location.time, order_id)),
            Side::Buy => self
                .bids
                .get(&BidKey::new(location.price, location.time, order_id)),
        }
    }

    /// Best ask order (lowest price, earliest arrival)
    #[must_use]
    pub fn best_ask(&self) -> Option<&Order> {
        self.asks.first().map(|(_, order)| order)
    }

    /// Best bid order (highest price, earliest arrival)
    #[must_use]
    pub fn best_bid(&self) -> Option<&Order> {
        self.bids.first().map(|(_, order)| order)
    }

    /// Best ask and best bid
    #[must_use]
    pub fn top_of_book(&self) -> (Option<&Order>, Option<&Order>) {
        (self.best_ask(), self.best_bid())
    }

    /// Check if the book is crossed (best ask <= best bid)
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match self.top_of_book() {
            (Some(ask), Some(bid)) => ask.price <= bid.price,
            _ => false,
        }
    }

    /// Fail if the book is crossed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CrossedBook`] with the offending prices.
    pub fn check_crossed(&self) -> Result<()> {
        match self.top_of_book() {
            (Some(ask), Some(bid)) if ask.price <= bid.price => Err(Error::CrossedBook {
                sequence: self.sequence,
                ask: ask.price,
                bid: bid.price,
            }),
            _ => Ok(()),
        }
    }

    /// Iterate one side, best price first
    pub fn orders(&self, side: Side) -> Box<dyn Iterator<Item = &Order> + '_> {
        match side {
            Side::Sell => Box::new(self.asks.values()),
            Side::Buy => Box::new(self.bids.values()),
        }
    }

    /// `[orderId, price, size]` for one side, best first.
    ///
    /// `limit` caps the number of orders; 0 means the whole side.
    #[must_use]
    pub fn extract(&self, side: Side, limit: usize) -> Vec<BookEntry> {
        let orders = self.orders(side).map(Order::entry);
        if limit == 0 {
            orders.collect()
        } else {
            orders.take(limit).collect()
        }
    }

    /// Aggregated `[price, size]` levels for one side, best first.
    ///
    /// `limit` caps the number of price levels; 0 means the whole side.
    #[must_use]
    pub fn extract_levels(&self, side: Side, limit: usize) -> Vec<PriceLevel> {
        let mut levels: Vec<PriceLevel> = Vec::new();
        for order in self.orders(side) {
            match levels.last_mut() {
                Some(level) if level.0 == order.price => level.1 += order.size,
                _ => {
                    if limit != 0 && levels.len() == limit {
                        break;
                    }
                    levels.push(PriceLevel(order.price, order.size));
                }
            }
        }
        levels
    }

    /// The whole book in snapshot form
    #[must_use]
    pub fn to_full_order_book(&self) -> FullOrderBook {
        FullOrderBook {
            sequence: self.sequence,
            asks: self.extract(Side::Sell, 0),
            bids: self.extract(Side::Buy, 0),
        }
    }

    /// Number of resting orders
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the book is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of orders per side as `(asks, bids)`
    #[must_use]
    pub fn num_orders(&self) -> (usize, usize) {
        (self.asks.len(), self.bids.len())
    }

    /// Remove every order and reset the sequence
    pub fn clear(&mut self) {
        self.asks.clear();
        self.bids.clear();
        self.index.clear();
        self.sequence = 0;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Add { id: u8, buy: bool, price: i64, size: i64, time: u64 },
        Remove { id: u8 },
        Resize { id: u8, size: i64 },
        Match { id: u8, filled: i64 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..32, any::<bool>(), 1i64..50, 1i64..20, 0u64..10).prop_map(
                |(id, buy, price, size, time)| Op::Add { id, buy, price, size, time }
            ),
            (0u8..32).prop_map(|id| Op::Remove { id }),
            (0u8..32, 0i64..20).prop_map(|(id, size)| Op::Resize { id, size }),
            (0u8..32, 0i64..20).prop_map(|(id, filled)| Op::Match { id, filled }),
        ]
    }

    fn apply(book: &mut OrderBook, op: &Op) {
        // errors leave the book untouched, which is what is checked below
        let _ = match op {
            Op::Add { id, buy, price, size, time } => {
                let side = if *buy { Side::Buy } else { Side::Sell };
                book.add_order(Order::new(
                    id.to_string(),
                    side,
                    Decimal::new(*price, 1),
                    Decimal::from(*size),
                    *time,
                ))
            }
            Op::Remove { id } => {
                book.remove_by_order_id(&id.to_string());
                Ok(())
            }
            Op::Resize { id, size } => book.resize_order(&id.to_string(), Decimal::from(*size)),
            Op::Match { id, filled } => book.match_order(&id.to_string(), Decimal::from(*filled)),
        };
    }

    proptest! {
        #[test]
        fn sides_stay_ordered(ops in prop::collection::vec(op(), 0..200)) {
            let mut book = OrderBook::new();
            for op in &ops {
                apply(&mut book, op);
            }

            let asks: Vec<_> = book.orders(Side::Sell).collect();
            for pair in asks.windows(2) {
                prop_assert!(pair[0].price <= pair[1].price);
                if pair[0].price == pair[1].price {
                    prop_assert!(pair[0].time <= pair[1].time);
                }
            }

            let bids: Vec<_> = book.orders(Side::Buy).collect();
            for pair in bids.windows(2) {
                prop_assert!(pair[0].price >= pair[1].price);
                if pair[0].price == pair[1].price {
                    prop_assert!(pair[0].time <= pair[1].time);
                }
            }
        }

        #[test]
        fn index_matches_stores(ops in prop::collection::vec(op(), 0..200)) {
            let mut book = OrderBook::new();
            for op in &ops {
                apply(&mut book, op);
            }

            let (asks, bids) = book.num_orders();
            prop_assert_eq!(asks + bids, book.len());

            for side in [Side::Sell, Side::Buy] {
                for order in book.orders(side) {
                    prop_assert!(order.size > Decimal::ZERO);
                    prop_assert_eq!(order.side, side);
                    prop_assert_eq!(book.get_order(&order.order_id), Some(order));
                }
            }
        }
    }
}
