//! Configuration for the level-3 market.
//!
//! This module provides the [`Config`] struct, built explicitly and passed to
//! each component at construction. There is no global configuration state.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Market type (spot or futures)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Spot market
    #[default]
    Spot,
    /// Futures market
    Futures,
}

impl Environment {
    /// Get the base URL for REST API
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Spot => "https://api.kucoin.com",
            Environment::Futures => "https://api-futures.kucoin.com",
        }
    }

    /// Path of the atomic full order book snapshot endpoint
    pub fn snapshot_path(&self) -> &'static str {
        match self {
            Environment::Spot => "/api/v3/market/orderbook/level3",
            Environment::Futures => "/api/v2/level3/snapshot",
        }
    }

    /// Prefix of the level-3 stream topic; the symbol is appended
    pub fn level3_topic_prefix(&self) -> &'static str {
        match self {
            Environment::Spot => "/spotMarket/level3:",
            Environment::Futures => "/contractMarket/level3v2:",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(Environment::Spot),
            "future" | "futures" => Ok(Environment::Futures),
            other => Err(Error::Config(format!(
                "market type must be spot or futures, got `{}`",
                other
            ))),
        }
    }
}

/// API credentials for signed snapshot requests
#[derive(Clone)]
pub struct Credentials {
    /// API key
    pub key: String,
    /// API secret
    pub secret: String,
    /// API passphrase
    pub passphrase: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Playback buffering limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Maximum number of deltas buffered while waiting for a snapshot
    pub buffer_capacity: usize,
    /// Deltas to buffer before the first snapshot request
    pub min_buffered: usize,
    /// Playback fails once the buffer is within this many slots of capacity
    pub overflow_margin: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_240,
            min_buffered: 5,
            overflow_margin: 5,
        }
    }
}

/// Continuous verification settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Interval between audits
    pub frequency: Duration,
    /// Delay before the first audit after start
    pub first_delay: Duration,
    /// Delay after an unusable or failed reference fetch
    pub cooldown: Duration,
    /// Maximum number of live snapshots held per audit
    pub window: usize,
    /// Live snapshots to collect before fetching the reference snapshot
    pub fetch_after: usize,
    /// Directory for audit artifacts; `None` disables file output
    pub log_dir: Option<PathBuf>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(20),
            first_delay: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            window: 200,
            fetch_after: 10,
            log_dir: None,
        }
    }
}

impl VerifyConfig {
    /// Set the audit interval
    #[must_use]
    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }

    /// Set the audit artifact directory
    #[must_use]
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }
}

/// Configuration for a single-symbol level-3 market
///
/// # Example
///
/// ```rust
/// use kucoin_level3::Config;
/// use kucoin_level3::config::{Environment, VerifyConfig};
///
/// let config = Config::new("BTC-USDT")
///     .with_environment(Environment::Spot)
///     .with_timeout(std::time::Duration::from_secs(10))
///     .with_verify(VerifyConfig::default());
///
/// assert_eq!(config.topic(), "/spotMarket/level3:BTC-USDT");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Instrument symbol, e.g. `BTC-USDT`
    symbol: String,

    /// Market type
    environment: Environment,

    /// Overrides the environment's REST base URL
    rest_base_url: Option<String>,

    /// Credentials for signed REST requests
    credentials: Option<Credentials>,

    /// HTTP request timeout
    timeout: Duration,

    /// Playback buffering limits
    playback: PlaybackConfig,

    /// Verification settings; `None` disables the verifier
    verify: Option<VerifyConfig>,
}

impl Config {
    /// Create a new configuration for the given symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            environment: Environment::default(),
            rest_base_url: None,
            credentials: None,
            timeout: Duration::from_secs(30),
            playback: PlaybackConfig::default(),
            verify: None,
        }
    }

    /// Set the market type
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Override the REST base URL (useful for testing against a local server)
    #[must_use]
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = Some(url.into());
        self
    }

    /// Set API credentials
    #[must_use]
    pub fn with_credentials(
        mut self,
        key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            key: key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        });
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set playback buffering limits
    #[must_use]
    pub fn with_playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    /// Enable continuous verification
    #[must_use]
    pub fn with_verify(mut self, verify: VerifyConfig) -> Self {
        self.verify = Some(verify);
        self
    }

    /// Get the symbol
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Get the environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Get the REST API base URL
    pub fn rest_base_url(&self) -> &str {
        self.rest_base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.rest_base_url())
    }

    /// Get the level-3 stream topic for this symbol
    pub fn topic(&self) -> String {
        format!("{}{}", self.environment.level3_topic_prefix(), self.symbol)
    }

    /// Get the credentials
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the playback limits
    pub fn playback(&self) -> PlaybackConfig {
        self.playback
    }

    /// Get the verification settings
    pub fn verify(&self) -> Option<&VerifyConfig> {
        self.verify.as_ref()
    }

    /// Check that the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty symbol or inconsistent limits.
    pub fn validate(&self) -> Result<(), Error> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Config("symbol is required".to_string()));
        }
        let playback = self.playback;
        if playback.min_buffered + playback.overflow_margin >= playback.buffer_capacity {
            return Err(Error::Config(format!(
                "playback buffer capacity {} is too small",
                playback.buffer_capacity
            )));
        }
        if let Some(verify) = &self.verify {
            if verify.fetch_after == 0 || verify.fetch_after > verify.window {
                return Err(Error::Config(format!(
                    "verify fetch_after must be within 1..={}",
                    verify.window
                )));
            }
        }
        Ok(())
    }
}

/// Backoff policy used by the supervisor between restarts
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Maximum number of restarts (0 = infinite)
    pub max_restarts: u32,
    /// Initial delay between restarts
    pub initial_delay_ms: u64,
    /// Maximum delay between restarts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 0,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RestartPolicy {
    /// Create a new restart policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum restarts (0 = infinite)
    pub fn max_restarts(mut self, restarts: u32) -> Self {
        self.max_restarts = restarts;
        self
    }

    /// Set initial delay in milliseconds
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate delay for a given restart attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::new("BTC-USDT");
        assert_eq!(config.symbol(), "BTC-USDT");
        assert_eq!(config.environment(), Environment::Spot);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.credentials().is_none());
        assert!(config.verify().is_none());
        assert_eq!(config.playback().buffer_capacity, 10_240);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_futures_environment() {
        let config = Config::new("XBTUSDTM").with_environment(Environment::Futures);
        assert!(config.rest_base_url().contains("futures"));
        assert_eq!(config.topic(), "/contractMarket/level3v2:XBTUSDTM");
        assert_eq!(
            config.environment().snapshot_path(),
            "/api/v2/level3/snapshot"
        );
    }

    #[test]
    fn test_builder_pattern() {
        let config = Config::new("ETH-USDT")
            .with_rest_base_url("http://127.0.0.1:8080")
            .with_credentials("key", "secret", "pass")
            .with_timeout(Duration::from_secs(5))
            .with_verify(VerifyConfig::default().with_frequency(Duration::from_secs(3)));

        assert_eq!(config.rest_base_url(), "http://127.0.0.1:8080");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.credentials().map(|c| c.key.as_str()), Some("key"));
        assert_eq!(
            config.verify().map(|v| v.frequency),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let config =
            Config::new("BTC-USDT").with_credentials("key", "top-secret", "pp-value-xyz");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("top-secret"));
        assert!(!debug.contains("pp-value-xyz"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(Config::new("  ").validate().is_err());

        let tiny = PlaybackConfig {
            buffer_capacity: 8,
            min_buffered: 5,
            overflow_margin: 5,
        };
        assert!(Config::new("BTC-USDT").with_playback(tiny).validate().is_err());

        let verify = VerifyConfig {
            fetch_after: 300,
            ..VerifyConfig::default()
        };
        assert!(Config::new("BTC-USDT").with_verify(verify).validate().is_err());
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("spot".parse::<Environment>().ok(), Some(Environment::Spot));
        assert_eq!(
            "Future".parse::<Environment>().ok(),
            Some(Environment::Futures)
        );
        assert!("margin".parse::<Environment>().is_err());
    }

    #[test]
    fn test_restart_delay_calculation() {
        let policy = RestartPolicy::new()
            .initial_delay_ms(100)
            .backoff_multiplier(2.0)
            .max_delay_ms(1000);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(1000));
    }
}
