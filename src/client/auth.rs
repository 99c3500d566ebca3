//! HMAC-SHA256 authentication for KuCoin API requests.
//!
//! Signed requests carry:
//!
//! - `KC-API-KEY`: the API key
//! - `KC-API-TIMESTAMP`: Unix timestamp in milliseconds
//! - `KC-API-SIGN`: base64 HMAC-SHA256 of `timestamp + method + path + body`
//! - `KC-API-PASSPHRASE`: the passphrase, itself HMAC-signed with the secret
//! - `KC-API-KEY-VERSION`: `2`
//!
//! # Example
//!
//! ```rust
//! use kucoin_level3::client::auth::Signer;
//!
//! let signer = Signer::new("key", "secret", "passphrase");
//! let headers = signer.headers(1_700_000_000_000, "GET", "/api/v3/market/orderbook/level3?symbol=BTC-USDT", "")?;
//! assert_eq!(headers.key, "key");
//! # Ok::<(), kucoin_level3::Error>(())
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Credentials;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Request signer holding the API credentials
#[derive(Clone)]
pub struct Signer {
    key: String,
    secret: String,
    passphrase: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Signer {
    /// Create a new signer
    pub fn new(
        key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Create a signer from configured credentials
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self::new(
            credentials.key.clone(),
            credentials.secret.clone(),
            credentials.passphrase.clone(),
        )
    }

    /// Base64 HMAC-SHA256 of `payload` keyed by the API secret
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret cannot be used as an HMAC key.
    pub fn sign(&self, payload: &str) -> Result<String, Error> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Config(format!("invalid API secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Build the authentication headers for a request
    ///
    /// # Arguments
    ///
    /// * `timestamp_ms` - Unix timestamp in milliseconds
    /// * `method` - HTTP method (GET, POST, ...)
    /// * `path` - Request path including the query string
    /// * `body` - Request body, empty for GET
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if signing fails.
    pub fn headers(
        &self,
        timestamp_ms: u64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<AuthHeaders, Error> {
        let payload = format!("{}{}{}{}", timestamp_ms, method, path, body);
        Ok(AuthHeaders {
            key: self.key.clone(),
            timestamp: timestamp_ms.to_string(),
            signature: self.sign(&payload)?,
            passphrase: self.sign(&self.passphrase)?,
        })
    }

    /// Get the current timestamp in milliseconds
    pub fn current_timestamp_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Authentication headers for a KuCoin API request
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    /// API key
    pub key: String,
    /// Unix timestamp in milliseconds
    pub timestamp: String,
    /// Request signature (base64)
    pub signature: String,
    /// Signed passphrase (base64)
    pub passphrase: String,
}

impl AuthHeaders {
    /// Header name for API key
    pub const KEY_HEADER: &'static str = "KC-API-KEY";
    /// Header name for timestamp
    pub const TIMESTAMP_HEADER: &'static str = "KC-API-TIMESTAMP";
    /// Header name for signature
    pub const SIGNATURE_HEADER: &'static str = "KC-API-SIGN";
    /// Header name for passphrase
    pub const PASSPHRASE_HEADER: &'static str = "KC-API-PASSPHRASE";
    /// Header name for key version
    pub const KEY_VERSION_HEADER: &'static str = "KC-API-KEY-VERSION";
    /// Key version sent with every signed request
    pub const KEY_VERSION: &'static str = "2";
}
