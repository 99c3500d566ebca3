//! Reconciliation engine.
//!
//! The [`Builder`] owns the live [`OrderBook`] and moves through
//! `Uninitialized -> Playback -> Streaming`:
//!
//! 1. **Playback**: deltas are buffered while one snapshot fetch runs in the
//!    background. When a snapshot lands inside the buffered range the book is
//!    seeded from it and the buffer is replayed.
//! 2. **Streaming**: each delta is applied under the write lock. Deltas at or
//!    below the book sequence are skipped; a delta that skips a sequence
//!    number is fatal and leaves the book untouched.
//!
//! Fatal errors are returned from [`Builder::run`]; the caller throws the
//! book away and starts over.
//!
//! Reads take the shared lock and never observe a half-applied delta.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::book::OrderBook;
use super::playback::{Playback, PlaybackAction, SnapshotVerdict};
use crate::config::{Config, PlaybackConfig};
use crate::error::Error;
use crate::types::{
    Delta, DepthResponse, DownstreamMessage, FullOrderBook, L3PartOrderBook, LastMatch,
    PartOrderBook, Side, StreamMessage, Ticker,
};
use crate::Result;

/// Source of atomic full order book snapshots
///
/// Implemented by [`RestClient`](crate::client::RestClient); tests use an
/// in-memory fetcher.
pub trait SnapshotFetcher: Send + Sync + 'static {
    /// Fetch the current full book for `symbol`
    fn fetch_snapshot(&self, symbol: &str) -> impl Future<Output = Result<DepthResponse>> + Send;
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, not yet started
    Uninitialized,
    /// Buffering deltas until a usable snapshot arrives
    Playback,
    /// Applying deltas as they arrive
    Streaming,
    /// Stopped on a fatal error
    Failed,
}

#[derive(Debug)]
struct Inner {
    book: OrderBook,
    state: EngineState,
    last_match: Option<LastMatch>,
    time: u64,
}

/// Reconciliation engine for one symbol
#[derive(Debug)]
pub struct Builder<F> {
    symbol: String,
    fetcher: Arc<F>,
    playback: PlaybackConfig,
    inner: RwLock<Inner>,
}

impl<F: SnapshotFetcher> Builder<F> {
    /// Create an engine with an empty book
    pub fn new(config: &Config, fetcher: Arc<F>) -> Self {
        Self {
            symbol: config.symbol().to_string(),
            fetcher,
            playback: config.playback(),
            inner: RwLock::new(Inner {
                book: OrderBook::new(),
                state: EngineState::Uninitialized,
                last_match: None,
                time: 0,
            }),
        }
    }

    /// Symbol this engine builds
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.inner.read().state
    }

    /// Current book sequence
    pub fn sequence(&self) -> u64 {
        self.inner.read().book.sequence()
    }

    /// Discard the book and start from an empty one at sequence 0
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.book = OrderBook::new();
        inner.state = EngineState::Uninitialized;
        inner.last_match = None;
        inner.time = 0;
    }

    /// Rebuild the book from scratch and keep it in sync with `rx`.
    ///
    /// Only returns on a fatal error, or with [`Error::TransportClosed`]
    /// when the sender side goes away.
    ///
    /// # Errors
    ///
    /// Every returned error is fatal for this book.
    pub async fn run(&self, rx: &mut mpsc::Receiver<DownstreamMessage>) -> Result<()> {
        let result = self.reload_order_book(rx).await;
        if let Err(e) = &result {
            error!(symbol = %self.symbol, error = %e, "order book stopped");
            self.inner.write().state = EngineState::Failed;
        }
        result
    }

    async fn reload_order_book(&self, rx: &mut mpsc::Receiver<DownstreamMessage>) -> Result<()> {
        warn!(symbol = %self.symbol, "rebuilding order book");
        self.reset();
        self.playback(rx).await?;

        while let Some(raw) = rx.recv().await {
            let msg = StreamMessage::try_from(&raw)?;
            self.apply(&msg)?;
        }
        Err(Error::TransportClosed)
    }

    async fn playback(&self, rx: &mut mpsc::Receiver<DownstreamMessage>) -> Result<()> {
        info!(
            symbol = %self.symbol,
            buffer_capacity = self.playback.buffer_capacity,
            "prepare playback"
        );
        self.inner.write().state = EngineState::Playback;

        let mut playback = Playback::new(self.playback);
        let mut fetch: Option<JoinHandle<Result<DepthResponse>>> = None;
        let outcome = self.buffer_until_ready(rx, &mut playback, &mut fetch).await;
        if let Some(handle) = fetch.take() {
            handle.abort();
        }
        outcome?;

        let (depth, buffer) = playback
            .into_parts()
            .ok_or_else(|| Error::Protocol("playback finished without a snapshot".to_string()))?;
        self.seed(&depth)?;
        self.replay(buffer)?;

        self.inner.write().state = EngineState::Streaming;
        info!(symbol = %self.symbol, sequence = self.sequence(), "finish playback");
        Ok(())
    }

    async fn buffer_until_ready(
        &self,
        rx: &mut mpsc::Receiver<DownstreamMessage>,
        playback: &mut Playback,
        fetch: &mut Option<JoinHandle<Result<DepthResponse>>>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                raw = rx.recv() => {
                    let raw = raw.ok_or(Error::TransportClosed)?;
                    let msg = StreamMessage::try_from(&raw)?;
                    if playback.first_sequence().is_none() {
                        info!(first_sequence = msg.sequence, "first buffered delta");
                    }
                    match playback.push(msg)? {
                        PlaybackAction::Buffering => {}
                        PlaybackAction::Ready => return Ok(()),
                        PlaybackAction::FetchSnapshot => {
                            info!(
                                symbol = %self.symbol,
                                buffered = playback.buffered(),
                                "start getting full level3 order book data"
                            );
                            *fetch = Some(self.spawn_fetch());
                        }
                    }
                }
                fetched = join_fetch(fetch), if fetch.is_some() => {
                    *fetch = None;
                    match flatten(fetched) {
                        Ok(depth) => match playback.offer_snapshot(depth) {
                            Ok(SnapshotVerdict::Ready) => {
                                info!(buffered = playback.buffered(), "sequence match, start playback");
                                return Ok(());
                            }
                            Ok(SnapshotVerdict::Early) | Ok(SnapshotVerdict::Stale) => {}
                            Err(e) => warn!(error = %e, "unusable snapshot"),
                        },
                        Err(e) => {
                            warn!(error = %e, "failed to fetch snapshot, retrying on next delta");
                            playback.fetch_failed();
                        }
                    }
                }
            }
        }
    }

    fn spawn_fetch(&self) -> JoinHandle<Result<DepthResponse>> {
        let fetcher = Arc::clone(&self.fetcher);
        let symbol = self.symbol.clone();
        tokio::spawn(async move { fetcher.fetch_snapshot(&symbol).await })
    }

    /// Fetch an independent snapshot in the background, normalized to the
    /// same ordering as [`snapshot`](Self::snapshot).
    pub fn spawn_full_order_book_fetch(&self) -> JoinHandle<Result<FullOrderBook>> {
        let fetcher = Arc::clone(&self.fetcher);
        let symbol = self.symbol.clone();
        tokio::spawn(async move {
            let depth = fetcher.fetch_snapshot(&symbol).await?;
            Ok(OrderBook::from_depth(&depth)?.to_full_order_book())
        })
    }

    /// Replace the book with one seeded from `depth`.
    ///
    /// # Errors
    ///
    /// Fails if the snapshot cannot be turned into a book; the current book
    /// is kept in that case.
    pub fn seed(&self, depth: &DepthResponse) -> Result<()> {
        let book = OrderBook::from_depth(depth)?;
        info!(
            sequence = book.sequence(),
            orders = book.len(),
            "seeded order book from snapshot"
        );
        let mut inner = self.inner.write();
        inner.book = book;
        inner.time = now_nanos();
        Ok(())
    }

    fn replay(&self, buffer: VecDeque<StreamMessage>) -> Result<()> {
        for msg in &buffer {
            self.apply(msg)?;
        }
        Ok(())
    }

    /// Apply one delta.
    ///
    /// Returns `false` if the delta was already reflected in the book.
    ///
    /// # Errors
    ///
    /// [`Error::SequenceGap`] if the delta skips a sequence number (the book is
    /// not touched), [`Error::CrossedBook`] if the book crosses afterwards, or
    /// the book error for an inconsistent delta.
    pub fn apply(&self, msg: &StreamMessage) -> Result<bool> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let expected = inner.book.sequence() + 1;

        if msg.sequence < expected {
            debug!(sequence = msg.sequence, expected, "skipping stale delta");
            return Ok(false);
        }
        if msg.sequence > expected {
            return Err(Error::SequenceGap {
                expected,
                got: msg.sequence,
            });
        }

        let book = &mut inner.book;
        book.set_sequence(msg.sequence);
        match &msg.delta {
            Delta::Received { .. } => {}
            Delta::Open { order, .. } => match order {
                Some(order) => book.add_order(order.clone())?,
                None => debug!(sequence = msg.sequence, "skipping open without price or size"),
            },
            Delta::Done { order_id, .. } => {
                book.remove_by_order_id(order_id);
            }
            Delta::Match {
                maker_order_id,
                remain_size,
                price,
                size,
                ..
            } => {
                book.resize_order(maker_order_id, *remain_size)?;
                inner.last_match = Some(LastMatch {
                    price: *price,
                    size: *size,
                });
            }
            Delta::Update { order_id, size } => book.resize_order(order_id, *size)?,
        }
        inner.book.check_crossed()?;
        if msg.ts != 0 {
            inner.time = msg.ts;
        }
        Ok(true)
    }

    /// Full book snapshot
    pub fn snapshot(&self) -> FullOrderBook {
        self.inner.read().book.to_full_order_book()
    }

    /// Full book snapshot as JSON
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.snapshot())?)
    }

    /// Top `limit` aggregated price levels per side (0 = all)
    pub fn get_part_order_book(&self, limit: usize) -> PartOrderBook {
        guarded("GetPartOrderBook", || {
            let inner = self.inner.read();
            PartOrderBook {
                sequence: inner.book.sequence(),
                time: inner.time,
                asks: inner.book.extract_levels(Side::Sell, limit),
                bids: inner.book.extract_levels(Side::Buy, limit),
            }
        })
    }

    /// Top `limit` raw orders per side (0 = all)
    pub fn get_l3_part_order_book(&self, limit: usize) -> L3PartOrderBook {
        guarded("GetL3PartOrderBook", || {
            let inner = self.inner.read();
            L3PartOrderBook {
                sequence: inner.book.sequence(),
                time: inner.time,
                asks: inner.book.extract(Side::Sell, limit),
                bids: inner.book.extract(Side::Buy, limit),
            }
        })
    }

    /// Last trade and top of book
    pub fn get_ticker(&self) -> Ticker {
        guarded("GetTicker", || {
            let inner = self.inner.read();
            let (ask, bid) = inner.book.top_of_book();
            Ticker {
                sequence: inner.book.sequence(),
                last_match: inner.last_match.clone(),
                best_ask: ask.map(|o| o.entry()),
                best_bid: bid.map(|o| o.entry()),
            }
        })
    }
}

/// Run a best-effort query, answering with an empty result if it panics
fn guarded<T: Default>(name: &str, query: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(query)).unwrap_or_else(|_| {
        error!(query = name, "query panicked, returning empty result");
        T::default()
    })
}

async fn join_fetch(
    fetch: &mut Option<JoinHandle<Result<DepthResponse>>>,
) -> std::result::Result<Result<DepthResponse>, JoinError> {
    match fetch {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined.map_err(|e| Error::Protocol(format!("snapshot task failed: {}", e)))?
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
