//! Level-3 order book reconstruction.
//!
//! - [`store`] - ordered per-side storage
//! - [`book`] - the [`OrderBook`] with its order-id index
//! - [`playback`] - buffering deltas until a usable snapshot arrives
//! - [`builder`] - the reconciliation engine that owns the live book
//! - [`verify`] - periodic audits against independent snapshots
//!
//! # Example
//!
//! ```rust
//! use kucoin_level3::orderbook::OrderBook;
//! use kucoin_level3::types::{DepthResponse, Side};
//!
//! let depth: DepthResponse = serde_json::from_str(
//!     r#"{"sequence":"100","asks":[["a1","10.5","1"]],"bids":[["b1","10","2"]]}"#,
//! )?;
//! let mut book = OrderBook::from_depth(&depth)?;
//! assert_eq!(book.sequence(), 100);
//!
//! book.resize_order("b1", "0.5".parse()?)?;
//! let bids = book.extract(Side::Buy, 10);
//! assert_eq!(bids[0].size().to_string(), "0.5");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod book;
pub mod builder;
pub mod playback;
pub mod store;
pub mod verify;

pub use book::OrderBook;
pub use builder::{Builder, EngineState, SnapshotFetcher};
pub use playback::{Playback, PlaybackAction, SnapshotVerdict};
pub use store::PriceOrderedStore;
pub use verify::{diff_order_book, Verifier};
