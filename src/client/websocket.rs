//! WebSocket transport for KuCoin level-3 data.
//!
//! The [`WebSocketClient`] connects with a public bullet token, subscribes to
//! the level-3 topic of one symbol and keeps the connection alive with
//! application-level pings at the interval the server advertises.
//!
//! [`WebSocketClient::run`] is the long-lived read loop: every data message
//! for the subscribed topic is forwarded, in arrival order, to each sink (the
//! reconciliation engine and, optionally, the verifier).
//!
//! # Example
//!
//! ```rust,no_run
//! use kucoin_level3::Config;
//! use kucoin_level3::client::{RestClient, WebSocketClient};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> kucoin_level3::Result<()> {
//! let config = Config::new("BTC-USDT");
//! let rest = RestClient::new(&config)?;
//!
//! let mut ws = WebSocketClient::connect(&rest).await?;
//! ws.subscribe(&config.topic()).await?;
//!
//! let (tx, mut rx) = mpsc::channel(1024);
//! tokio::spawn(ws.run(config.topic(), vec![tx]));
//! while let Some(msg) = rx.recv().await {
//!     println!("{:?}", msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::client::rest::{InstanceServer, RestClient};
use crate::error::Error;
use crate::types::{DownstreamMessage, MessageKind, UpstreamMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the connect URL `endpoint?token=..&connectId=..`
pub fn connect_url(endpoint: &str, token: &str, connect_id: &str) -> Result<Url, Error> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| Error::Config(format!("invalid endpoint {}: {}", endpoint, e)))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("connectId", connect_id);
    Ok(url)
}

/// WebSocket client for one KuCoin push connection
///
/// This client is NOT thread-safe. It is moved into the transport task that
/// drives [`run`](Self::run).
#[derive(Debug)]
pub struct WebSocketClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    message_id: u64,
    connect_id: String,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl WebSocketClient {
    /// Obtain a public token and connect to the first advertised server
    ///
    /// # Errors
    ///
    /// Returns an error if the token request fails, no server is advertised,
    /// or the connection cannot be established.
    pub async fn connect(rest: &RestClient) -> Result<Self, Error> {
        let bullet = rest.bullet_public().await?;
        let server = bullet
            .instance_servers
            .first()
            .ok_or_else(|| Error::Protocol("bullet-public returned no instance servers".into()))?;
        Self::connect_to(server, &bullet.token).await
    }

    /// Connect to a specific push server
    pub async fn connect_to(server: &InstanceServer, token: &str) -> Result<Self, Error> {
        let connect_id = format!("{:016x}", rand::thread_rng().gen::<u64>());
        let url = connect_url(&server.endpoint, token, &connect_id)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();
        info!(endpoint = %server.endpoint, connect_id = %connect_id, "websocket connected");

        Ok(Self {
            write,
            read,
            message_id: 1,
            connect_id,
            ping_interval: Duration::from_millis(server.ping_interval),
            ping_timeout: Duration::from_millis(server.ping_timeout),
        })
    }

    /// Connection id sent in the connect URL
    pub fn connect_id(&self) -> &str {
        &self.connect_id
    }

    /// Advertised ping interval
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    fn next_id(&mut self) -> String {
        let id = self.message_id;
        self.message_id += 1;
        id.to_string()
    }

    /// Send a command to the push server
    async fn send_command(&mut self, cmd: &UpstreamMessage) -> Result<(), Error> {
        let json = serde_json::to_string(cmd)?;
        self.write.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Subscribe to a topic, returning the request id echoed in the ack
    pub async fn subscribe(&mut self, topic: &str) -> Result<String, Error> {
        let id = self.next_id();
        self.send_command(&UpstreamMessage::subscribe(id.clone(), topic))
            .await?;
        debug!(topic, id = %id, "subscribe sent");
        Ok(id)
    }

    /// Send a keepalive ping
    pub async fn ping(&mut self) -> Result<(), Error> {
        let id = self.next_id();
        self.send_command(&UpstreamMessage::ping(id)).await
    }

    /// Receive the next envelope from the server
    ///
    /// Protocol-level pings are answered here.
    ///
    /// # Returns
    ///
    /// The next message, or `None` if the stream ended.
    pub async fn next(&mut self) -> Option<Result<DownstreamMessage, Error>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(Error::from));
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(_)) => {
                    return Some(Err(Error::ConnectionClosed));
                }
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Drive the connection until it fails.
    ///
    /// Data messages for `topic` are forwarded to every sink. Returns
    /// [`Error::ConnectionClosed`] if the server stops answering pings or
    /// closes the stream, and [`Error::TransportClosed`] if a sink is gone.
    pub async fn run(
        mut self,
        topic: String,
        sinks: Vec<mpsc::Sender<DownstreamMessage>>,
    ) -> Result<(), Error> {
        let period = self.ping_interval.max(Duration::from_secs(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_pong = Instant::now();

        let result = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if last_pong.elapsed() > period + self.ping_timeout {
                        warn!(topic = %topic, "ping timeout");
                        break Err(Error::ConnectionClosed);
                    }
                    if let Err(e) = self.ping().await {
                        break Err(e);
                    }
                }
                msg = self.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => break Err(e),
                        None => break Err(Error::ConnectionClosed),
                    };
                    last_pong = Instant::now();
                    if let Err(e) = dispatch(&topic, msg, &sinks).await {
                        break Err(e);
                    }
                }
            }
        };

        let _ = self.write.close().await;
        if let Err(e) = &result {
            error!(topic = %topic, error = %e, "websocket transport stopped");
        }
        result
    }

    /// Close the WebSocket connection
    pub async fn close(&mut self) -> Result<(), Error> {
        self.write.close().await?;
        Ok(())
    }
}

/// Route one envelope: forward topic data, log the rest
async fn dispatch(
    topic: &str,
    msg: DownstreamMessage,
    sinks: &[mpsc::Sender<DownstreamMessage>],
) -> Result<(), Error> {
    match msg.kind {
        MessageKind::Welcome => debug!(id = ?msg.id, "welcome"),
        MessageKind::Ack => info!(id = ?msg.id, topic, "subscribed"),
        MessageKind::Pong => {}
        MessageKind::Error => {
            return Err(Error::Protocol(format!(
                "server error: {}",
                msg.data.map(|d| d.to_string()).unwrap_or_default()
            )));
        }
        MessageKind::Message if msg.topic.as_deref() == Some(topic) => {
            if let Some((last, rest)) = sinks.split_last() {
                for sink in rest {
                    sink.send(msg.clone())
                        .await
                        .map_err(|_| Error::TransportClosed)?;
                }
                last.send(msg).await.map_err(|_| Error::TransportClosed)?;
            }
        }
        MessageKind::Message | MessageKind::Other => {
            debug!(topic = ?msg.topic, "ignoring message");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOPIC: &str = "/spotMarket/level3:BTC-USDT";

    #[test]
    fn test_connect_url() {
        let url = connect_url("wss://ws-api-spot.kucoin.com/", "tok+en", "abc").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://ws-api-spot.kucoin.com/?token=tok%2Ben&connectId=abc"
        );
        assert!(connect_url("not a url", "t", "c").is_err());
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_topic_data() {
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let sinks = vec![tx1, tx2];

        let msg = DownstreamMessage::message(TOPIC, "done", json!({"sequence": "1"}));
        dispatch(TOPIC, msg.clone(), &sinks).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap(), msg);
        assert_eq!(rx2.recv().await.unwrap(), msg);

        let other = DownstreamMessage::message("/spotMarket/level3:ETH-USDT", "done", json!({}));
        dispatch(TOPIC, other, &sinks).await.unwrap();
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_control_messages() {
        let (tx, mut rx) = mpsc::channel(4);
        let sinks = vec![tx];

        let welcome: DownstreamMessage =
            serde_json::from_str(r#"{"id":"hQvf8jkno","type":"welcome"}"#).unwrap();
        dispatch(TOPIC, welcome, &sinks).await.unwrap();
        let ack: DownstreamMessage = serde_json::from_str(r#"{"id":"1","type":"ack"}"#).unwrap();
        dispatch(TOPIC, ack, &sinks).await.unwrap();
        assert!(rx.try_recv().is_err());

        let err: DownstreamMessage =
            serde_json::from_str(r#"{"id":"2","type":"error","data":"topic not found"}"#).unwrap();
        let result = dispatch(TOPIC, err, &sinks).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_dispatch_closed_sink() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let msg = DownstreamMessage::message(TOPIC, "done", json!({}));
        let result = dispatch(TOPIC, msg, &[tx]).await;
        assert!(matches!(result, Err(Error::TransportClosed)));
    }
}
