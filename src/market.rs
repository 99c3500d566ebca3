//! Market capability interface and the restart supervisor.
//!
//! An [`Exchange`] is what the RPC front-end talks to. [`KucoinMarket`] wires
//! one symbol's transport, reconciliation engine and verifier together;
//! [`run_supervised`] keeps it running, rebuilding the book from scratch
//! after every fatal error.
//!
//! The engine handle returned by [`KucoinMarket::builder`] is shared across
//! restarts, so queries keep working while the book is rebuilt (they see an
//! empty book at sequence 0 during playback).
//!
//! # Example
//!
//! ```rust,no_run
//! use kucoin_level3::config::{Config, RestartPolicy};
//! use kucoin_level3::market::{run_supervised, KucoinMarket};
//!
//! # async fn example() -> kucoin_level3::Result<()> {
//! let market = KucoinMarket::new(Config::new("BTC-USDT"))?;
//! let queries = market.builder();
//! tokio::spawn(async move { run_supervised(&market, RestartPolicy::default()).await });
//!
//! let top = queries.get_part_order_book(10);
//! println!("{} asks at sequence {}", top.asks.len(), top.sequence);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::client::{RestClient, WebSocketClient};
use crate::config::{Config, RestartPolicy};
use crate::error::Error;
use crate::orderbook::{Builder, SnapshotFetcher, Verifier};
use crate::types::{DownstreamMessage, PartOrderBook};
use crate::Result;

/// Extension method returning raw level-3 entries
pub const GET_L3_PART_ORDER_BOOK: &str = "GetL3PartOrderBook";

/// Query surface exposed to the RPC front-end
pub trait Exchange: Send + Sync {
    /// Top `limit` aggregated price levels per side (0 = all)
    fn get_part_order_book(&self, limit: usize) -> PartOrderBook;

    /// Route events for one order to `route`
    fn add_event_route(
        &self,
        order_id: &str,
        route: mpsc::Sender<DownstreamMessage>,
    ) -> Result<()> {
        let _ = (order_id, route);
        Err(Error::Unsupported("AddEventRoute".to_string()))
    }

    /// Call a market-specific method with JSON arguments
    fn invoke(&self, method: &str, args: Value) -> Result<Value>;
}

/// Source of the live level-3 stream
///
/// Implemented by [`RestClient`], which obtains a bullet token and drives a
/// [`WebSocketClient`]; tests feed deltas from memory.
pub trait Feed: Send + Sync + 'static {
    /// Stream data messages for `topic` into every sink until the stream fails
    fn stream(
        &self,
        topic: String,
        sinks: Vec<mpsc::Sender<DownstreamMessage>>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl Feed for RestClient {
    fn stream(
        &self,
        topic: String,
        sinks: Vec<mpsc::Sender<DownstreamMessage>>,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let mut ws = WebSocketClient::connect(self).await?;
            ws.subscribe(&topic).await?;
            ws.run(topic, sinks).await
        }
    }
}

#[derive(Debug, Deserialize)]
struct L3Args {
    number: usize,
}

/// Level-3 market for one KuCoin symbol
#[derive(Debug)]
pub struct KucoinMarket<S = RestClient> {
    config: Config,
    source: Arc<S>,
    builder: Arc<Builder<S>>,
}

impl KucoinMarket<RestClient> {
    /// Create a market backed by the KuCoin REST and WebSocket APIs
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration, or an error if
    /// the HTTP client cannot be initialized.
    pub fn new(config: Config) -> Result<Self> {
        let rest = RestClient::new(&config)?;
        Self::with_source(config, Arc::new(rest))
    }
}

impl<S: SnapshotFetcher + Feed> KucoinMarket<S> {
    /// Create a market over any snapshot and stream source
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration.
    pub fn with_source(config: Config, source: Arc<S>) -> Result<Self> {
        config.validate()?;
        let builder = Arc::new(Builder::new(&config, Arc::clone(&source)));
        Ok(Self {
            config,
            source,
            builder,
        })
    }

    /// Engine handle used for queries; stays valid across restarts
    pub fn builder(&self) -> Arc<Builder<S>> {
        Arc::clone(&self.builder)
    }

    /// Configuration this market was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one session until the first task stops.
    ///
    /// Spawns the transport, the engine and (if configured) the verifier.
    /// When any of them returns, the others are aborted and its error is
    /// returned.
    pub async fn run_once(&self) -> Result<()> {
        let capacity = self.config.playback().buffer_capacity;
        let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

        let (tx, mut rx) = mpsc::channel(capacity);
        let mut sinks = vec![tx];

        let builder = Arc::clone(&self.builder);
        tasks.spawn(async move { ("engine", builder.run(&mut rx).await) });

        if let Some(verify) = self.config.verify() {
            let (vtx, mut vrx) = mpsc::channel(capacity);
            sinks.push(vtx);
            let mut verifier = Verifier::new(Arc::clone(&self.builder), verify.clone());
            tasks.spawn(async move { ("verifier", verifier.run(&mut vrx).await) });
        }

        let source = Arc::clone(&self.source);
        let topic = self.config.topic();
        tasks.spawn(async move { ("transport", source.stream(topic, sinks).await) });

        let outcome = match tasks.join_next().await {
            Some(Ok((task, result))) => {
                if let Err(e) = &result {
                    error!(task, error = %e, fatal = e.is_fatal(), "market task stopped");
                }
                result
            }
            Some(Err(e)) => Err(Error::Protocol(format!("market task panicked: {}", e))),
            None => Ok(()),
        };
        tasks.shutdown().await;
        outcome
    }
}

impl<S: SnapshotFetcher + Feed> Exchange for KucoinMarket<S> {
    fn get_part_order_book(&self, limit: usize) -> PartOrderBook {
        self.builder.get_part_order_book(limit)
    }

    fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            GET_L3_PART_ORDER_BOOK => {
                let args: L3Args = serde_json::from_value(args)?;
                let builder = &self.builder;
                let book = catch_unwind(AssertUnwindSafe(|| {
                    builder.get_l3_part_order_book(args.number)
                }))
                .map_err(|_| Error::Protocol(format!("{} panicked", method)))?;
                Ok(serde_json::to_value(book)?)
            }
            other => Err(Error::Unsupported(other.to_string())),
        }
    }
}

/// Keep `market` running, restarting from playback after each failure.
///
/// The restart counter is cleared once a session outlives the policy's
/// maximum delay.
///
/// # Errors
///
/// Returns the last error once `policy.max_restarts` restarts have been used
/// (never, with the default of 0).
pub async fn run_supervised<S: SnapshotFetcher + Feed>(
    market: &KucoinMarket<S>,
    policy: RestartPolicy,
) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        let started = Instant::now();
        let err = match market.run_once().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if started.elapsed().as_millis() > u128::from(policy.max_delay_ms) {
            attempt = 0;
        }
        if policy.max_restarts > 0 && attempt >= policy.max_restarts {
            error!(
                symbol = %market.config.symbol(),
                restarts = attempt,
                error = %err,
                "giving up on market"
            );
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        attempt += 1;
        warn!(
            symbol = %market.config.symbol(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "restarting market"
        );
        tokio::time::sleep(delay).await;
        info!(symbol = %market.config.symbol(), "market restarted");
    }
}
