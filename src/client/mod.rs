//! API clients for communicating with KuCoin.
//!
//! This module contains:
//!
//! - [`rest`] - snapshot and token endpoints
//! - [`websocket`] - level-3 push transport
//! - [`auth`] - HMAC-SHA256 request signing

pub mod auth;
pub mod rest;
pub mod websocket;

pub use auth::Signer;
pub use rest::{BulletToken, InstanceServer, RestClient};
pub use websocket::WebSocketClient;
