//! Domain and wire types.
//!
//! - [`order`] - Resting orders, sides and snapshot entries
//! - [`depth`] - Snapshot and query response types
//! - [`messages`] - WebSocket envelopes and level-3 deltas

pub mod depth;
pub mod messages;
pub mod order;

pub use depth::{
    DepthEntry, DepthResponse, FullOrderBook, L3PartOrderBook, LastMatch, PartOrderBook, Ticker,
};
pub use messages::{Delta, DownstreamMessage, MessageKind, StreamMessage, UpstreamMessage};
pub use order::{BookEntry, Order, PriceLevel, Side};
