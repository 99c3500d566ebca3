//! Integration tests against the live KuCoin API.
//!
//! # Setup
//!
//! Set environment variables:
//!    - LEVEL3_LIVE: any value enables these tests
//!    - LEVEL3_SYMBOL: symbol to use (default BTC-USDT)
//!    - LEVEL3_API_KEY, LEVEL3_API_SECRET, LEVEL3_API_PASSPHRASE: needed for
//!      the spot level-3 snapshot, which requires a signed request
//!
//! # Running
//!
//! ```bash
//! LEVEL3_LIVE=1 cargo test --test integration_live -- --nocapture
//! ```

use std::time::Duration;

use kucoin_level3::client::{RestClient, WebSocketClient};
use kucoin_level3::orderbook::OrderBook;
use kucoin_level3::types::{MessageKind, StreamMessage};
use kucoin_level3::Config;
use tokio::time::timeout;

/// Helper to create a config from environment variables
fn create_config() -> Option<Config> {
    std::env::var("LEVEL3_LIVE").ok()?;
    let symbol = std::env::var("LEVEL3_SYMBOL").unwrap_or_else(|_| "BTC-USDT".to_string());
    let mut config = Config::new(symbol);
    if let (Ok(key), Ok(secret), Ok(passphrase)) = (
        std::env::var("LEVEL3_API_KEY"),
        std::env::var("LEVEL3_API_SECRET"),
        std::env::var("LEVEL3_API_PASSPHRASE"),
    ) {
        config = config.with_credentials(key, secret, passphrase);
    }
    Some(config)
}

/// Skip test if live testing is not enabled
macro_rules! require_config {
    () => {
        match create_config() {
            Some(c) => c,
            None => {
                eprintln!("Skipping test: LEVEL3_LIVE not set");
                return;
            }
        }
    };
}

#[tokio::test]
async fn test_bullet_public() {
    let config = require_config!();
    let rest = RestClient::new(&config).unwrap();

    let bullet = rest.bullet_public().await;
    assert!(bullet.is_ok(), "Failed to get bullet token: {:?}", bullet);

    let bullet = bullet.unwrap();
    assert!(!bullet.token.is_empty());
    assert!(!bullet.instance_servers.is_empty());
    println!("Push server: {}", bullet.instance_servers[0].endpoint);
}

#[tokio::test]
async fn test_atomic_full_order_book() {
    let config = require_config!();
    if config.credentials().is_none() {
        eprintln!("Skipping test: LEVEL3_API_KEY, LEVEL3_API_SECRET, LEVEL3_API_PASSPHRASE not set");
        return;
    }
    let rest = RestClient::new(&config).unwrap();

    let depth = rest.get_atomic_full_order_book(config.symbol()).await;
    assert!(depth.is_ok(), "Failed to get snapshot: {:?}", depth);

    let book = OrderBook::from_depth(&depth.unwrap()).unwrap();
    println!("Snapshot at {} with {} orders", book.sequence(), book.len());
    assert!(book.sequence() > 0);
    assert!(!book.is_crossed());
}

#[tokio::test]
async fn test_websocket_streams_level3() {
    let config = require_config!();
    let rest = RestClient::new(&config).unwrap();

    let mut ws = WebSocketClient::connect(&rest).await.unwrap();
    let topic = config.topic();
    ws.subscribe(&topic).await.unwrap();

    let mut decoded = 0;
    let result = timeout(Duration::from_secs(20), async {
        while let Some(msg) = ws.next().await {
            let msg = msg.unwrap();
            match msg.kind {
                MessageKind::Message if msg.topic.as_deref() == Some(topic.as_str()) => {
                    let delta = StreamMessage::try_from(&msg).unwrap();
                    println!("{} {}", delta.sequence, delta.delta.name());
                    decoded += 1;
                    if decoded == 10 {
                        break;
                    }
                }
                other => println!("Control message: {:?}", other),
            }
        }
    })
    .await;
    assert!(result.is_ok(), "Timed out waiting for level-3 messages");
    assert_eq!(decoded, 10);

    ws.close().await.unwrap();
}
