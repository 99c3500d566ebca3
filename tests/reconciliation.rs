//! End-to-end reconciliation tests.
//!
//! These drive the full ingestion pipeline with an in-memory snapshot source
//! and channel-fed deltas; no network access is needed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kucoin_level3::config::RestartPolicy;
use kucoin_level3::market::{run_supervised, Feed, KucoinMarket};
use kucoin_level3::orderbook::{Builder, EngineState, SnapshotFetcher};
use kucoin_level3::types::{DepthResponse, DownstreamMessage, PriceLevel};
use kucoin_level3::{Config, Error, Exchange, Result};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const TOPIC: &str = "/spotMarket/level3:BTC-USDT";

/// Fixed snapshot, one script of deltas per session
struct MemorySource {
    snapshot: Value,
    sessions: Mutex<VecDeque<Vec<DownstreamMessage>>>,
}

impl MemorySource {
    fn new(sessions: Vec<Vec<DownstreamMessage>>) -> Arc<Self> {
        Arc::new(Self {
            snapshot: snapshot(),
            sessions: Mutex::new(sessions.into()),
        })
    }
}

impl SnapshotFetcher for MemorySource {
    fn fetch_snapshot(&self, _symbol: &str) -> impl Future<Output = Result<DepthResponse>> + Send {
        let depth = serde_json::from_value(self.snapshot.clone()).map_err(Error::from);
        async move { depth }
    }
}

impl Feed for MemorySource {
    fn stream(
        &self,
        _topic: String,
        sinks: Vec<mpsc::Sender<DownstreamMessage>>,
    ) -> impl Future<Output = Result<()>> + Send {
        let script = self.sessions.lock().pop_front().unwrap_or_default();
        async move {
            for msg in script {
                for sink in &sinks {
                    sink.send(msg.clone())
                        .await
                        .map_err(|_| Error::TransportClosed)?;
                }
            }
            std::future::pending().await
        }
    }
}

fn snapshot() -> Value {
    json!({
        "sequence": "11",
        "asks": [["a1", "101", "1", "1"], ["a2", "102", "2", "2"]],
        "bids": [["b1", "99", "3", "3"]]
    })
}

fn msg(subject: &str, data: Value) -> DownstreamMessage {
    DownstreamMessage::message(TOPIC, subject, data)
}

fn noise(range: std::ops::RangeInclusive<u64>) -> Vec<DownstreamMessage> {
    range
        .map(|s| {
            msg(
                "received",
                json!({"sequence": s.to_string(), "orderId": format!("r{}", s), "ts": "1"}),
            )
        })
        .collect()
}

fn trading() -> Vec<DownstreamMessage> {
    let mut script = noise(10..=14);
    script.push(msg(
        "open",
        json!({"sequence": "15", "side": "buy", "price": "100", "size": "1",
               "orderId": "b2", "orderTime": "5", "ts": "5"}),
    ));
    script.push(msg(
        "match",
        json!({"sequence": "16", "side": "sell", "price": "101", "size": "0.6",
               "remainSize": "0.4", "makerOrderId": "a1", "takerOrderId": "t1",
               "tradeId": "x1", "ts": "6"}),
    ));
    script.push(msg(
        "update",
        json!({"sequence": "17", "orderId": "a2", "size": "1.5", "ts": "7"}),
    ));
    script
}

async fn wait_for<F: SnapshotFetcher>(builder: &Builder<F>, sequence: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while builder.state() != EngineState::Streaming || builder.sequence() < sequence {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

fn assert_traded_book<F: SnapshotFetcher>(builder: &Builder<F>) {
    let part = builder.get_part_order_book(0);
    assert_eq!(part.sequence, 17);
    assert_eq!(part.time, 7);
    assert_eq!(
        part.asks,
        vec![PriceLevel(dec!(101), dec!(0.4)), PriceLevel(dec!(102), dec!(1.5))]
    );
    assert_eq!(
        part.bids,
        vec![PriceLevel(dec!(100), dec!(1)), PriceLevel(dec!(99), dec!(3))]
    );

    let ticker = builder.get_ticker();
    let last = ticker.last_match.unwrap();
    assert_eq!((last.price, last.size), (dec!(101), dec!(0.6)));
    assert_eq!(ticker.best_bid.unwrap().order_id(), "b2");
    assert_eq!(ticker.best_ask.unwrap().order_id(), "a1");
}

#[tokio::test]
async fn test_pipeline_rebuilds_book_from_snapshot_and_stream() {
    let source = MemorySource::new(Vec::new());
    let builder = Arc::new(Builder::new(&Config::new("BTC-USDT"), source));

    let (tx, mut rx) = mpsc::channel(64);
    let engine = Arc::clone(&builder);
    let handle = tokio::spawn(async move { engine.run(&mut rx).await });

    for m in trading() {
        tx.send(m).await.unwrap();
    }
    wait_for(&builder, 17).await;
    assert_traded_book(&builder);

    let full = builder.snapshot();
    let ids: Vec<_> = full.bids.iter().map(|e| e.order_id().to_string()).collect();
    assert_eq!(ids, ["b2", "b1"]);
    let bytes = builder.snapshot_bytes().unwrap();
    let decoded: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded["asks"][0], json!(["a1", "101", "0.4"]));

    drop(tx);
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(Error::TransportClosed)));
    assert_eq!(builder.state(), EngineState::Failed);
}

#[tokio::test]
async fn test_supervisor_rebuilds_after_gap() {
    let mut broken = noise(10..=14);
    broken.extend(noise(16..=16));
    let source = MemorySource::new(vec![broken, trading()]);

    let policy = RestartPolicy::new().initial_delay_ms(1).max_delay_ms(5);
    let market = KucoinMarket::with_source(Config::new("BTC-USDT"), source).unwrap();
    let builder = market.builder();
    let supervisor = tokio::spawn(async move { run_supervised(&market, policy).await });

    wait_for(&builder, 17).await;
    assert_traded_book(&builder);
    supervisor.abort();
}

#[tokio::test]
async fn test_market_extension_calls() {
    let source = MemorySource::new(vec![trading()]);
    let market = KucoinMarket::with_source(Config::new("BTC-USDT"), source).unwrap();
    let builder = market.builder();
    let market = Arc::new(market);

    let runner = Arc::clone(&market);
    let session = tokio::spawn(async move { runner.run_once().await });
    wait_for(&builder, 17).await;

    let l3 = market
        .invoke("GetL3PartOrderBook", json!({"number": 2}))
        .unwrap();
    assert_eq!(l3["bids"], json!([["b2", "100", "1"], ["b1", "99", "3"]]));
    assert_eq!(market.get_part_order_book(1).asks.len(), 1);
    assert!(matches!(
        market.invoke("Cancel", json!({})),
        Err(Error::Unsupported(_))
    ));

    session.abort();
}
