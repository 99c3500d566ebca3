//! WebSocket message types.
//!
//! This module contains the commands sent to the KuCoin push server, the
//! downstream envelope it sends back, and the typed level-3 deltas decoded
//! from that envelope.
//!
//! Every level-3 message is wrapped in the same envelope:
//!
//! ```json
//! {"type":"message","topic":"/spotMarket/level3:BTC-USDT","subject":"open","data":{...}}
//! ```
//!
//! `subject` names the delta and `data.sequence` is the venue sequence it
//! advances the book to. [`StreamMessage::try_from`] turns an envelope into a
//! [`Delta`], rejecting unknown subjects and sides as protocol violations.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::depth::WireU64;
use super::order::{Order, Side};
use crate::error::Error;
use crate::Result;

/// Command sent to the push server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpstreamMessage {
    /// Subscribe to a topic
    Subscribe {
        /// Request id, echoed in the ack
        id: String,
        /// Topic, e.g. `/spotMarket/level3:BTC-USDT`
        topic: String,
        /// Private channel flag
        #[serde(rename = "privateChannel")]
        private_channel: bool,
        /// Ask the server to ack the subscription
        response: bool,
    },
    /// Unsubscribe from a topic
    Unsubscribe {
        /// Request id
        id: String,
        /// Topic
        topic: String,
        /// Private channel flag
        #[serde(rename = "privateChannel")]
        private_channel: bool,
        /// Ask the server to ack
        response: bool,
    },
    /// Keepalive ping
    Ping {
        /// Request id, echoed in the pong
        id: String,
    },
}

impl UpstreamMessage {
    /// Public subscription with an ack
    pub fn subscribe(id: impl Into<String>, topic: impl Into<String>) -> Self {
        UpstreamMessage::Subscribe {
            id: id.into(),
            topic: topic.into(),
            private_channel: false,
            response: true,
        }
    }

    /// Keepalive ping
    pub fn ping(id: impl Into<String>) -> Self {
        UpstreamMessage::Ping { id: id.into() }
    }
}

/// Envelope type of a downstream message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Sent once after connecting
    Welcome,
    /// Subscription acknowledged
    Ack,
    /// Reply to a ping
    Pong,
    /// Topic data
    Message,
    /// Server-side error
    Error,
    /// Anything else
    #[serde(other)]
    Other,
}

/// Message received from the push server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamMessage {
    /// Request id for acks and pongs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Envelope type
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Topic for data messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Delta type for level-3 data messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl DownstreamMessage {
    /// Build a data message, mostly useful for feeding the engine directly
    pub fn message(
        topic: impl Into<String>,
        subject: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            kind: MessageKind::Message,
            topic: Some(topic.into()),
            subject: Some(subject.into()),
            data: Some(data),
        }
    }
}

/// Book effect of a level-3 message
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Order accepted by the matching engine, not yet resting
    Received {
        /// Order id
        order_id: String,
        /// Client order id
        client_oid: Option<String>,
    },
    /// Order now rests on the book
    ///
    /// `order` is `None` for the sentinel records the venue emits with an
    /// empty price or a zero size; those advance the sequence only.
    Open {
        /// Side of the new order
        side: Side,
        /// The resting order
        order: Option<Order>,
    },
    /// Order left the book
    Done {
        /// Order id
        order_id: String,
        /// `filled` or `canceled`
        reason: String,
    },
    /// Trade against a resting maker order
    Match {
        /// Maker side
        side: Side,
        /// Trade price
        price: Decimal,
        /// Trade size
        size: Decimal,
        /// Maker size left after the trade
        remain_size: Decimal,
        /// Resting order that was hit
        maker_order_id: String,
        /// Incoming order
        taker_order_id: String,
        /// Trade id
        trade_id: String,
    },
    /// Resting order size changed
    Update {
        /// Order id
        order_id: String,
        /// New absolute size
        size: Decimal,
    },
}

impl Delta {
    /// Wire name of this delta
    pub fn name(&self) -> &'static str {
        match self {
            Delta::Received { .. } => "received",
            Delta::Open { .. } => "open",
            Delta::Done { .. } => "done",
            Delta::Match { .. } => "match",
            Delta::Update { .. } => "update",
        }
    }
}

/// A decoded level-3 delta with its sequence
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// Sequence this delta advances the book to
    pub sequence: u64,
    /// Venue timestamp
    pub ts: u64,
    /// Book effect
    pub delta: Delta,
}

#[derive(Deserialize)]
struct SequenceData {
    sequence: WireU64,
    #[serde(default)]
    ts: WireU64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedData {
    order_id: String,
    #[serde(default)]
    client_oid: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenData {
    side: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    size: String,
    order_id: String,
    #[serde(default)]
    order_time: WireU64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoneData {
    order_id: String,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchData {
    side: String,
    price: String,
    size: String,
    remain_size: String,
    maker_order_id: String,
    #[serde(default)]
    taker_order_id: String,
    #[serde(default)]
    trade_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateData {
    order_id: String,
    #[serde(alias = "newSize")]
    size: String,
}

fn field<T: DeserializeOwned>(subject: &str, data: &serde_json::Value) -> Result<T> {
    T::deserialize(data).map_err(|e| Error::Protocol(format!("malformed {} message: {}", subject, e)))
}

fn decimal(subject: &str, name: &str, value: &str) -> Result<Decimal> {
    value
        .parse()
        .map_err(|_| Error::Protocol(format!("malformed {} {}: `{}`", subject, name, value)))
}

/// Parse an open order, or `None` for a sentinel record
fn open_order(data: OpenData, side: Side) -> Option<Order> {
    let price = data.price.parse::<Decimal>().ok()?;
    let size = data.size.parse::<Decimal>().ok()?;
    if size <= Decimal::ZERO {
        return None;
    }
    Some(Order::new(data.order_id, side, price, size, data.order_time.0))
}

impl TryFrom<&DownstreamMessage> for StreamMessage {
    type Error = Error;

    fn try_from(msg: &DownstreamMessage) -> Result<Self> {
        let subject = msg
            .subject
            .as_deref()
            .ok_or_else(|| Error::Protocol("level3 message without subject".to_string()))?;
        let data = msg
            .data
            .as_ref()
            .ok_or_else(|| Error::Protocol(format!("{} message without data", subject)))?;
        let header: SequenceData = field(subject, data)?;

        let delta = match subject {
            "received" => {
                let d: ReceivedData = field(subject, data)?;
                Delta::Received {
                    order_id: d.order_id,
                    client_oid: d.client_oid,
                }
            }
            "open" => {
                let d: OpenData = field(subject, data)?;
                let side = Side::parse(&d.side)?;
                Delta::Open {
                    side,
                    order: open_order(d, side),
                }
            }
            "done" => {
                let d: DoneData = field(subject, data)?;
                Delta::Done {
                    order_id: d.order_id,
                    reason: d.reason,
                }
            }
            "match" => {
                let d: MatchData = field(subject, data)?;
                Delta::Match {
                    side: Side::parse(&d.side)?,
                    price: decimal(subject, "price", &d.price)?,
                    size: decimal(subject, "size", &d.size)?,
                    remain_size: decimal(subject, "remainSize", &d.remain_size)?,
                    maker_order_id: d.maker_order_id,
                    taker_order_id: d.taker_order_id,
                    trade_id: d.trade_id,
                }
            }
            "update" | "change" => {
                let d: UpdateData = field(subject, data)?;
                Delta::Update {
                    size: decimal(subject, "size", &d.size)?,
                    order_id: d.order_id,
                }
            }
            other => return Err(Error::Protocol(format!("error msg type: {}", other))),
        };

        Ok(StreamMessage {
            sequence: header.sequence.0,
            ts: header.ts.0,
            delta,
        })
    }
}
