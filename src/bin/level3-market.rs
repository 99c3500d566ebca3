//! Supervised level-3 market for one KuCoin symbol
//!
//! Usage:
//!   LEVEL3_SYMBOL=BTC-USDT cargo run --bin level3-market
//!
//! Optional:
//!   LEVEL3_ENV=futures              # spot (default) or futures
//!   LEVEL3_API_KEY=xxx              # signed snapshot requests
//!   LEVEL3_API_SECRET=xxx
//!   LEVEL3_API_PASSPHRASE=xxx
//!   LEVEL3_VERIFY_SECS=20           # enables the verifier
//!   LEVEL3_VERIFY_DIR=/var/log/l3   # enables verifier artifacts
//!   RUST_LOG=kucoin_level3=debug

use std::env;
use std::time::Duration;

use kucoin_level3::config::{Environment, RestartPolicy, VerifyConfig};
use kucoin_level3::market::{run_supervised, KucoinMarket};
use kucoin_level3::{Config, Error};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn config_from_env() -> Result<Config, Error> {
    let symbol = var("LEVEL3_SYMBOL")
        .ok_or_else(|| Error::Config("LEVEL3_SYMBOL is required".to_string()))?;
    let environment = match var("LEVEL3_ENV") {
        Some(env) => env.parse::<Environment>()?,
        None => Environment::Spot,
    };
    let mut config = Config::new(symbol).with_environment(environment);

    if let (Some(key), Some(secret), Some(passphrase)) = (
        var("LEVEL3_API_KEY"),
        var("LEVEL3_API_SECRET"),
        var("LEVEL3_API_PASSPHRASE"),
    ) {
        config = config.with_credentials(key, secret, passphrase);
    }

    let frequency = var("LEVEL3_VERIFY_SECS")
        .map(|secs| {
            secs.parse::<u64>()
                .map_err(|e| Error::Config(format!("LEVEL3_VERIFY_SECS: {}", e)))
        })
        .transpose()?;
    let log_dir = var("LEVEL3_VERIFY_DIR");
    if frequency.is_some() || log_dir.is_some() {
        let mut verify = VerifyConfig::default();
        if let Some(secs) = frequency {
            verify = verify.with_frequency(Duration::from_secs(secs));
        }
        if let Some(dir) = log_dir {
            verify = verify.with_log_dir(dir);
        }
        config = config.with_verify(verify);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kucoin_level3=info")),
        )
        .init();

    let config = config_from_env()?;
    info!(
        symbol = %config.symbol(),
        topic = %config.topic(),
        verify = config.verify().is_some(),
        "starting level3 market"
    );
    let market = KucoinMarket::new(config)?;

    tokio::select! {
        result = run_supervised(&market, RestartPolicy::default()) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
        }
    }
    Ok(())
}
