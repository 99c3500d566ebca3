//! Snapshot and query response types.
//!
//! [`DepthResponse`] is the venue's atomic full order book as returned by the
//! REST snapshot endpoint. [`FullOrderBook`] is the normalized form the engine
//! produces from its own state and the verifier compares against.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::order::{BookEntry, Order, PriceLevel, Side};
use crate::error::Error;
use crate::Result;

/// Full level-3 book at one sequence, sides ordered best price first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullOrderBook {
    /// Book sequence
    pub sequence: u64,
    /// Asks, ascending by price then arrival
    pub asks: Vec<BookEntry>,
    /// Bids, descending by price then arrival
    pub bids: Vec<BookEntry>,
}

impl FullOrderBook {
    /// Total number of orders on both sides
    pub fn len(&self) -> usize {
        self.asks.len() + self.bids.len()
    }

    /// Whether both sides are empty
    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }
}

/// Atomic full order book as returned by the snapshot endpoint
///
/// The venue sends `sequence` either as a string or as a number. Entries are
/// `[orderId, price, size]` or `[orderId, price, size, time]`.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthResponse {
    /// Snapshot sequence
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence: Option<u64>,
    /// Asks, best first
    #[serde(default)]
    pub asks: Vec<DepthEntry>,
    /// Bids, best first
    #[serde(default)]
    pub bids: Vec<DepthEntry>,
}

impl DepthResponse {
    /// The snapshot sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySequence`] if the venue sent none.
    pub fn sequence(&self) -> Result<u64> {
        self.sequence.ok_or(Error::EmptySequence)
    }

    /// Convert the entries of one side into orders.
    ///
    /// Arrival time comes from the entry when present, otherwise from its
    /// position so the venue's ordering is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decimal`] for an unparseable price or size.
    pub fn orders(&self, side: Side) -> Result<Vec<Order>> {
        let entries = match side {
            Side::Sell => &self.asks,
            Side::Buy => &self.bids,
        };
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| entry.to_order(side, index as u64))
            .collect()
    }
}

/// One raw snapshot entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DepthEntry {
    /// `[orderId, price, size, time]`
    Timed(String, String, String, WireU64),
    /// `[orderId, price, size]`
    Plain(String, String, String),
}

impl DepthEntry {
    fn to_order(&self, side: Side, index: u64) -> Result<Order> {
        match self {
            DepthEntry::Timed(id, price, size, time) => Order::parse(id, side, price, size, time.0),
            DepthEntry::Plain(id, price, size) => Order::parse(id, side, price, size, index),
        }
    }
}

/// A `u64` that the venue may send as a JSON string or number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireU64(pub u64);

impl<'de> Deserialize<'de> for WireU64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match StringOrU64::deserialize(deserializer)? {
            StringOrU64::Number(n) => Ok(WireU64(n)),
            StringOrU64::Text(s) => s.trim().parse().map(WireU64).map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrU64 {
    Number(u64),
    Text(String),
}

/// Accepts a number, a numeric string, an empty string or null.
pub(crate) fn deserialize_sequence<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<StringOrU64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StringOrU64::Number(n)) => Ok(Some(n)),
        Some(StringOrU64::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(StringOrU64::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Top-N aggregated book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartOrderBook {
    /// Book sequence
    pub sequence: u64,
    /// Timestamp of the last applied delta
    pub time: u64,
    /// Ask levels, best first
    pub asks: Vec<PriceLevel>,
    /// Bid levels, best first
    pub bids: Vec<PriceLevel>,
}

/// Top-N raw level-3 book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3PartOrderBook {
    /// Book sequence
    pub sequence: u64,
    /// Timestamp of the last applied delta
    pub time: u64,
    /// Asks, best first
    pub asks: Vec<BookEntry>,
    /// Bids, best first
    pub bids: Vec<BookEntry>,
}

/// Price and size of the most recent trade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMatch {
    /// Trade price
    pub price: Decimal,
    /// Trade size
    pub size: Decimal,
}

/// Last trade plus top of book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Book sequence
    pub sequence: u64,
    /// Most recent trade, if any has been seen since the last reload
    #[serde(rename = "match")]
    pub last_match: Option<LastMatch>,
    /// Best ask order
    pub best_ask: Option<BookEntry>,
    /// Best bid order
    pub best_bid: Option<BookEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_depth_response_string_sequence() {
        let json = r#"{
            "sequence": "1545896669291",
            "asks": [["A1", "9.50", "10", "1545896669100"]],
            "bids": [["B1", "9.00", "2", 1545896669105]]
        }"#;
        let depth: DepthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(depth.sequence().unwrap(), 1_545_896_669_291);

        let asks = depth.orders(Side::Sell).unwrap();
        assert_eq!(asks[0].order_id, "A1");
        assert_eq!(asks[0].price, dec!(9.50));
        assert_eq!(asks[0].time, 1_545_896_669_100);

        let bids = depth.orders(Side::Buy).unwrap();
        assert_eq!(bids[0].side, Side::Buy);
        assert_eq!(bids[0].time, 1_545_896_669_105);
    }

    #[test]
    fn test_depth_response_numeric_sequence_and_plain_entries() {
        let json = r#"{"sequence": 42, "asks": [["A1","1","1"],["A2","1","2"]], "bids": []}"#;
        let depth: DepthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(depth.sequence().unwrap(), 42);

        let asks = depth.orders(Side::Sell).unwrap();
        assert_eq!(asks[0].time, 0);
        assert_eq!(asks[1].time, 1);
    }

    #[test]
    fn test_depth_response_empty_sequence() {
        let depth: DepthResponse =
            serde_json::from_str(r#"{"sequence": "", "asks": [], "bids": []}"#).unwrap();
        assert!(matches!(depth.sequence(), Err(Error::EmptySequence)));

        let depth: DepthResponse = serde_json::from_str(r#"{"sequence": null}"#).unwrap();
        assert!(matches!(depth.sequence(), Err(Error::EmptySequence)));
    }

    #[test]
    fn test_ticker_wire_names() {
        let ticker = Ticker {
            sequence: 3,
            last_match: Some(LastMatch {
                price: dec!(9.5),
                size: dec!(1),
            }),
            best_ask: None,
            best_bid: Some(BookEntry("B1".into(), dec!(9), dec!(2))),
        };
        let value = serde_json::to_value(&ticker).unwrap();
        assert_eq!(value["match"]["price"], "9.5");
        assert_eq!(value["bestBid"][0], "B1");
        assert!(value["bestAsk"].is_null());
    }
}
