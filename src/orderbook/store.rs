//! Ordered per-side order storage.
//!
//! A [`PriceOrderedStore`] is a `BTreeMap` keyed by a composite
//! (price, arrival time, order id) key. The key type decides the direction:
//! [`AskKey`] iterates lowest price first, [`BidKey`] highest price first.
//! Ties at the same price go to the earliest arrival, then to the order id so
//! keys never collide.

use std::cmp::Reverse;
use std::collections::btree_map;
use std::collections::BTreeMap;

use rust_decimal::Decimal;

/// Composite key for one side of the book
pub trait SideKey: Ord + Clone + std::fmt::Debug {
    /// Build the key for an order
    fn new(price: Decimal, time: u64, order_id: &str) -> Self;

    /// Price component of the key
    fn price(&self) -> Decimal;
}

/// Ask key: ascending price, then arrival
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AskKey(Decimal, u64, String);

impl SideKey for AskKey {
    fn new(price: Decimal, time: u64, order_id: &str) -> Self {
        AskKey(price, time, order_id.to_owned())
    }

    fn price(&self) -> Decimal {
        self.0
    }
}

/// Bid key: descending price, then arrival
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BidKey(Reverse<Decimal>, u64, String);

impl SideKey for BidKey {
    fn new(price: Decimal, time: u64, order_id: &str) -> Self {
        BidKey(Reverse(price), time, order_id.to_owned())
    }

    fn price(&self) -> Decimal {
        self.0 .0
    }
}

/// Ordered container for one side of the book.
///
/// All operations are `O(log n)`; iteration yields best price first.
#[derive(Debug, Clone)]
pub struct PriceOrderedStore<K: SideKey, V> {
    entries: BTreeMap<K, V>,
}

impl<K: SideKey, V> PriceOrderedStore<K, V> {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or overwrite, returning the previous value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Point lookup
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Mutable point lookup
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Delete a key
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    /// Best entry
    #[must_use]
    pub fn first(&self) -> Option<(&K, &V)> {
        self.entries.first_key_value()
    }

    /// Iterate best price first
    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    /// Iterate values best price first
    pub fn values(&self) -> btree_map::Values<'_, K, V> {
        self.entries.values()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: SideKey, V> Default for PriceOrderedStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
