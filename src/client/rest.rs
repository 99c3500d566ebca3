//! HTTP REST client for the KuCoin API.
//!
//! This module provides the [`RestClient`] used for two things: fetching the
//! atomic full order book snapshot (it implements
//! [`SnapshotFetcher`](crate::orderbook::SnapshotFetcher)) and obtaining the
//! public WebSocket token.
//!
//! Every KuCoin response is wrapped in `{"code": "200000", "data": ...}`;
//! any other code is reported as [`Error::Api`].
//!
//! # Example
//!
//! ```rust,no_run
//! use kucoin_level3::Config;
//! use kucoin_level3::client::RestClient;
//!
//! # async fn example() -> kucoin_level3::Result<()> {
//! let config = Config::new("BTC-USDT").with_credentials("key", "secret", "passphrase");
//! let rest = RestClient::new(&config)?;
//!
//! let depth = rest.get_atomic_full_order_book("BTC-USDT").await?;
//! println!("snapshot at {}", depth.sequence()?);
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::client::auth::{AuthHeaders, Signer};
use crate::config::{Config, Environment};
use crate::error::{ApiError, Error};
use crate::orderbook::SnapshotFetcher;
use crate::types::DepthResponse;

/// Success code in the KuCoin response envelope
const SUCCESS_CODE: &str = "200000";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

/// Public WebSocket token and server list
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletToken {
    /// Connection token
    pub token: String,
    /// Available push servers
    pub instance_servers: Vec<InstanceServer>,
}

/// One push server
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceServer {
    /// WebSocket endpoint
    pub endpoint: String,
    /// Whether TLS is used
    #[serde(default)]
    pub encrypt: bool,
    /// Protocol, `websocket`
    #[serde(default)]
    pub protocol: String,
    /// Ping interval in milliseconds
    pub ping_interval: u64,
    /// Ping timeout in milliseconds
    pub ping_timeout: u64,
}

/// HTTP client for the KuCoin REST API
#[derive(Debug)]
pub struct RestClient {
    client: Client,
    base_url: String,
    environment: Environment,
    signer: Option<Signer>,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Arguments
    ///
    /// * `config` - Client configuration; credentials are optional
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.rest_base_url().trim_end_matches('/').to_string(),
            environment: config.environment(),
            signer: config.credentials().map(Signer::from_credentials),
        })
    }

    /// Build authentication headers for a request
    fn auth_headers(&self, method: &Method, path: &str, body: &str) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let Some(signer) = &self.signer else {
            return Ok(headers);
        };
        let auth = signer.headers(Signer::current_timestamp_ms(), method.as_str(), path, body)?;
        for (name, value) in [
            (AuthHeaders::KEY_HEADER, auth.key.as_str()),
            (AuthHeaders::TIMESTAMP_HEADER, auth.timestamp.as_str()),
            (AuthHeaders::SIGNATURE_HEADER, auth.signature.as_str()),
            (AuthHeaders::PASSPHRASE_HEADER, auth.passphrase.as_str()),
            (AuthHeaders::KEY_VERSION_HEADER, AuthHeaders::KEY_VERSION),
        ] {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid {} header: {}", name, e)))?;
            headers.insert(header, value);
        }
        Ok(headers)
    }

    /// Send a request and unwrap the response envelope
    ///
    /// # Arguments
    ///
    /// * `method` - HTTP method
    /// * `path` - API path including the query string (without base URL)
    pub async fn request<T>(&self, method: Method, path: &str) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let headers = self.auth_headers(&method, path, "")?;
        debug!(%method, path, "rest request");

        let response = self
            .client
            .request(method, &url)
            .headers(headers)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response<T>(&self, response: reqwest::Response) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();

        // Check for rate limiting
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000);

            return Err(Error::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api(parse_error(status.as_u16(), &body)));
        }

        unwrap_envelope(status.as_u16(), &body)
    }

    /// Fetch the atomic full level-3 order book
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success response, or a
    /// body that cannot be parsed.
    pub async fn get_atomic_full_order_book(&self, symbol: &str) -> Result<DepthResponse, Error> {
        let path = snapshot_query(self.environment, symbol);
        self.request(Method::GET, &path).await
    }

    /// Obtain a public WebSocket token
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success response.
    pub async fn bullet_public(&self) -> Result<BulletToken, Error> {
        self.request(Method::POST, "/api/v1/bullet-public").await
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl SnapshotFetcher for RestClient {
    fn fetch_snapshot(
        &self,
        symbol: &str,
    ) -> impl Future<Output = crate::Result<DepthResponse>> + Send {
        self.get_atomic_full_order_book(symbol)
    }
}

/// Snapshot path with an encoded `symbol` query, as signed and sent
fn snapshot_query(environment: Environment, symbol: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("symbol", symbol)
        .finish();
    format!("{}?{}", environment.snapshot_path(), query)
}

/// Parse an error body, falling back to the raw text
fn parse_error(status: u16, body: &str) -> ApiError {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return ApiError::new(status, body);
    };
    let message = value
        .get("msg")
        .or_else(|| value.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or(body)
        .to_string();
    let code = value.get("code").and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    ApiError {
        status,
        code,
        message,
    }
}

/// Unwrap `{"code": "200000", "data": ...}`
fn unwrap_envelope<T>(status: u16, body: &str) -> Result<T, Error>
where
    T: serde::de::DeserializeOwned,
{
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    if envelope.code != SUCCESS_CODE {
        return Err(Error::Api(ApiError {
            status,
            code: Some(envelope.code),
            message: envelope.msg.unwrap_or_default(),
        }));
    }
    envelope
        .data
        .ok_or_else(|| Error::Api(ApiError::with_code(status, SUCCESS_CODE, "response without data")))
}
