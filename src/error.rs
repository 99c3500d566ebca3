//! Error types for the kucoin-level3 crate.
//!
//! Errors fall into two groups. Transient errors (a snapshot request that
//! failed, a rate limit) are retried locally. Fatal errors mean the book can
//! no longer be trusted; they are returned up to the supervisor, which throws
//! the book away and rebuilds it from a fresh playback. See [`Error::is_fatal`].

use rust_decimal::Decimal;

/// The main error type for this crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A price or size could not be parsed as a decimal
    #[error("Decimal error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    /// Filesystem error while writing audit artifacts
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// API returned an error response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded
    #[error("Rate limited{}", retry_suffix(.retry_after_ms))]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// The channel feeding deltas into the engine was closed
    #[error("Delta transport closed")]
    TransportClosed,

    /// A delta skipped one or more sequence numbers
    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap {
        /// Expected sequence number
        expected: u64,
        /// Actual sequence number received
        got: u64,
    },

    /// Unknown message type or side, or a required field that cannot be read
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Best ask is at or below best bid after applying a delta
    #[error("Crossed book at sequence {sequence}: ask {ask} <= bid {bid}")]
    CrossedBook {
        /// Book sequence when the cross was detected
        sequence: u64,
        /// Best ask price
        ask: Decimal,
        /// Best bid price
        bid: Decimal,
    },

    /// A fill would leave an order with negative remaining size
    #[error("Negative size for order {order_id}: {size} - {filled}")]
    NegativeSize {
        /// Order being filled
        order_id: String,
        /// Size before the fill
        size: Decimal,
        /// Filled quantity
        filled: Decimal,
    },

    /// An order id that is already resting was added again
    #[error("Duplicate order id: {0}")]
    DuplicateOrder(String),

    /// No usable snapshot was found before the playback buffer filled up
    #[error("Playback failed: {buffered} deltas buffered (capacity {capacity}) without a usable snapshot")]
    PlaybackOverflow {
        /// Deltas buffered when playback gave up
        buffered: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// The live book disagreed with an independently fetched snapshot
    #[error("Verification failed at sequence {sequence}: {reason}")]
    VerifyMismatch {
        /// Audited sequence
        sequence: u64,
        /// First difference found
        reason: String,
    },

    /// Snapshot response carried no sequence
    #[error("Snapshot has an empty sequence")]
    EmptySequence,

    /// Extension method is not supported by this market
    #[error("Unsupported method: {0}")]
    Unsupported(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
}

/// Error returned by the KuCoin API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error code from API (if provided)
    pub code: Option<String>,
    /// Error message
    pub message: String,
}

impl Error {
    /// Whether this error means the book is no longer trustworthy.
    ///
    /// Fatal errors stop ingestion and force a full rebuild. Everything else
    /// is retried at the next opportunity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SequenceGap { .. }
                | Error::Protocol(_)
                | Error::CrossedBook { .. }
                | Error::NegativeSize { .. }
                | Error::DuplicateOrder(_)
                | Error::PlaybackOverflow { .. }
                | Error::VerifyMismatch { .. }
                | Error::TransportClosed
                | Error::ConnectionClosed
                | Error::WebSocket(_)
                | Error::Config(_)
                | Error::Io(_)
        )
    }
}

fn retry_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {}ms", ms),
        None => String::new(),
    }
}

impl From<tokio_tungstenite::tungstenite::http::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::http::Error) -> Self {
        Error::Config(format!("HTTP error building WebSocket request: {}", err))
    }
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error with an error code
    pub fn with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_api_error_display() {
        let err = Error::Api(ApiError::new(400, "Bad request"));
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Bad request"));
    }

    #[test]
    fn test_rate_limited_display() {
        let err = Error::RateLimited {
            retry_after_ms: Some(1000),
        };
        assert!(err.to_string().contains("1000"));
        assert_eq!(
            Error::RateLimited {
                retry_after_ms: None
            }
            .to_string(),
            "Rate limited"
        );
    }

    #[test]
    fn test_sequence_gap() {
        let err = Error::SequenceGap {
            expected: 101,
            got: 102,
        };
        assert!(err.to_string().contains("101"));
        assert!(err.to_string().contains("102"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::CrossedBook {
            sequence: 7,
            ask: dec!(1),
            bid: dec!(2)
        }
        .is_fatal());
        assert!(Error::Protocol("error side: up".into()).is_fatal());
        assert!(Error::PlaybackOverflow {
            buffered: 10_236,
            capacity: 10_240
        }
        .is_fatal());

        assert!(!Error::EmptySequence.is_fatal());
        assert!(!Error::Api(ApiError::with_code(200, "400100", "bad symbol")).is_fatal());
        assert!(!Error::RateLimited {
            retry_after_ms: None
        }
        .is_fatal());
        assert!(!Error::Timeout.is_fatal());
    }
}
