//! Resting order types.
//!
//! An [`Order`] is a single resting limit order as it appears on the venue's
//! level-3 feed. Prices and sizes are exact decimals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// Order side as reported by the venue
///
/// Buy orders rest on the bid side, sell orders on the ask side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy order, rests on the bids
    Buy,
    /// Sell order, rests on the asks
    Sell,
}

impl Side {
    /// Parse a wire side tag.
    ///
    /// # Errors
    ///
    /// Any value other than `buy` or `sell` is a protocol violation.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(Error::Protocol(format!("error side: {}", other))),
        }
    }

    /// Get the opposite side
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Name of the book side this order rests on (`asks` or `bids`)
    pub fn book_side(self) -> &'static str {
        match self {
            Side::Buy => "bids",
            Side::Sell => "asks",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// A resting order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Venue order id, unique while resting
    pub order_id: String,
    /// Side the order rests on
    pub side: Side,
    /// Limit price
    pub price: Decimal,
    /// Remaining resting size, always positive
    pub size: Decimal,
    /// Arrival time, breaks ties between orders at the same price
    pub time: u64,
    /// Opaque payload carried with the order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

impl Order {
    /// Create a new order without an info payload
    pub fn new(
        order_id: impl Into<String>,
        side: Side,
        price: Decimal,
        size: Decimal,
        time: u64,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            side,
            price,
            size,
            time,
            info: None,
        }
    }

    /// Parse an order from wire strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decimal`] if price or size is not a decimal number.
    pub fn parse(
        order_id: impl Into<String>,
        side: Side,
        price: &str,
        size: &str,
        time: u64,
    ) -> Result<Self> {
        Ok(Self::new(
            order_id,
            side,
            price.parse::<Decimal>()?,
            size.parse::<Decimal>()?,
            time,
        ))
    }

    /// Attach an info payload
    #[must_use]
    pub fn with_info(mut self, info: serde_json::Value) -> Self {
        self.info = Some(info);
        self
    }

    /// The `[orderId, price, size]` form used in snapshots
    pub fn entry(&self) -> BookEntry {
        BookEntry(self.order_id.clone(), self.price, self.size)
    }
}

/// One order in a level-3 snapshot, serialized as `[orderId, price, size]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry(pub String, pub Decimal, pub Decimal);

impl BookEntry {
    /// Order id
    pub fn order_id(&self) -> &str {
        &self.0
    }

    /// Price
    pub fn price(&self) -> Decimal {
        self.1
    }

    /// Remaining size
    pub fn size(&self) -> Decimal {
        self.2
    }
}

/// Aggregated price level, serialized as `[price, size]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel(pub Decimal, pub Decimal);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("buy").ok(), Some(Side::Buy));
        assert_eq!(Side::parse("sell").ok(), Some(Side::Sell));

        let err = Side::parse("up").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("up"));
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Buy.book_side(), "bids");
        assert_eq!(Side::Sell.book_side(), "asks");
        assert_eq!(Side::Sell.to_string(), "sell");
    }

    #[test]
    fn test_order_parse_keeps_exact_decimals() {
        let order = Order::parse("A1", Side::Buy, "10.00", "0.1", 3).unwrap();
        assert_eq!(order.price, dec!(10));
        assert_eq!(order.size, dec!(0.1));
        assert!(Order::parse("A1", Side::Buy, "", "1", 3).is_err());
    }

    #[test]
    fn test_book_entry_serializes_as_array() {
        let order = Order::new("A1", Side::Sell, dec!(9.50), dec!(4), 1);
        let json = serde_json::to_string(&order.entry()).unwrap();
        assert_eq!(json, r#"["A1","9.50","4"]"#);

        let level: PriceLevel = serde_json::from_str(r#"["9.5","12"]"#).unwrap();
        assert_eq!(level, PriceLevel(dec!(9.5), dec!(12)));
    }
}
