//! # kucoin-level3
//!
//! Full level-3 (order-by-order) order book reconstruction for
//! [KuCoin](https://www.kucoin.com) markets.
//!
//! ## Features
//!
//! - **Snapshot playback** - deltas are buffered while an atomic full order
//!   book is fetched, then the buffer is replayed on top of it
//! - **Strict sequencing** - stale deltas are skipped, gaps are fatal
//! - **Continuous verification** - the live book is periodically diffed
//!   against an independently fetched snapshot
//! - **Supervised restarts** - any fatal error throws the book away and
//!   rebuilds it from scratch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kucoin_level3::config::{Config, RestartPolicy, VerifyConfig};
//! use kucoin_level3::market::{run_supervised, KucoinMarket};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kucoin_level3::Error> {
//!     let config = Config::new("BTC-USDT")
//!         .with_credentials("key", "secret", "passphrase")
//!         .with_verify(VerifyConfig::default());
//!     let market = KucoinMarket::new(config)?;
//!
//!     let book = market.builder();
//!     tokio::spawn(async move {
//!         loop {
//!             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!             let ticker = book.get_ticker();
//!             println!("{} {:?} {:?}", ticker.sequence, ticker.best_bid, ticker.best_ask);
//!         }
//!     });
//!
//!     run_supervised(&market, RestartPolicy::default()).await
//! }
//! ```
//!
//! ## Price Representation
//!
//! Prices and sizes are [`rust_decimal::Decimal`]. They are compared
//! numerically, so `"1.50"` and `"1.5"` are the same price.
//!
//! ## Architecture
//!
//! - [`client`] - REST snapshot fetcher, request signing, WebSocket transport
//! - [`types`] - orders, snapshot and query responses, level-3 deltas
//! - [`orderbook`] - the book, playback, the reconciliation engine, the verifier
//! - [`market`] - the query interface and the restart supervisor
//! - [`config`] - configuration
//! - [`error`] - error types and fatal classification
//!
//! ## Performance
//!
//! - `FxHashMap` order-id index
//! - `parking_lot` readers-writer lock around the whole book
//! - `BTreeMap` sides keyed by price then arrival time

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod market;
pub mod orderbook;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;
pub use market::{run_supervised, Exchange, KucoinMarket};
pub use orderbook::{Builder, OrderBook};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = Config::new("ETH-USDT");
        assert_eq!(config.symbol(), "ETH-USDT");
        assert_eq!(config.topic(), "/spotMarket/level3:ETH-USDT");
    }
}
