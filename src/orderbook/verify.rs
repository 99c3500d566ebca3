//! Continuous verification of the live book.
//!
//! The [`Verifier`] watches the same delta stream as the builder. Once the
//! audit timer fires it records a live snapshot after every delta, keyed by
//! sequence. After `fetch_after` snapshots it fetches one independent
//! snapshot from the venue. If that snapshot's sequence is in the window, the
//! two are diffed order by order; any difference is fatal.
//!
//! A reference snapshot too far ahead of or behind the window cannot be
//! audited. The window is dropped and the next audit waits for the cooldown.
//!
//! With a log directory configured the raw stream is appended to
//! `<symbol>-update-<name>.log`, rotated to `<sequence>.log` after every
//! successful audit, and the compared snapshots are dumped next to it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::builder::{Builder, SnapshotFetcher};
use crate::config::VerifyConfig;
use crate::error::Error;
use crate::types::{BookEntry, DownstreamMessage, FullOrderBook};
use crate::Result;

/// Compare a live snapshot with a reference snapshot.
///
/// Sequences must match, both sides must hold the same number of orders,
/// and every position must carry the same order id with numerically equal
/// price and size.
///
/// # Errors
///
/// Returns [`Error::VerifyMismatch`] describing the first difference.
pub fn diff_order_book(live: &FullOrderBook, reference: &FullOrderBook) -> Result<()> {
    let mismatch = |reason: String| Error::VerifyMismatch {
        sequence: live.sequence,
        reason,
    };

    if live.sequence != reference.sequence {
        return Err(mismatch(format!(
            "sequence differs: {} - {}",
            live.sequence, reference.sequence
        )));
    }
    diff_side(&live.asks, &reference.asks).map_err(|e| mismatch(format!("asks: {}", e)))?;
    diff_side(&live.bids, &reference.bids).map_err(|e| mismatch(format!("bids: {}", e)))?;
    Ok(())
}

fn diff_side(live: &[BookEntry], reference: &[BookEntry]) -> std::result::Result<(), String> {
    if live.len() != reference.len() {
        return Err(format!("depth differs: {} != {}", live.len(), reference.len()));
    }
    for (index, (a, b)) in live.iter().zip(reference).enumerate() {
        if a.order_id() != b.order_id() {
            return Err(format!(
                "index {}: order id {} != {}",
                index,
                a.order_id(),
                b.order_id()
            ));
        }
        if a.price() != b.price() {
            return Err(format!(
                "order {}: price {} != {}",
                a.order_id(),
                a.price(),
                b.price()
            ));
        }
        if a.size() != b.size() {
            return Err(format!(
                "order {}: size {} != {}",
                a.order_id(),
                a.size(),
                b.size()
            ));
        }
    }
    Ok(())
}

/// Where a reference snapshot falls relative to the audit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// A live snapshot with the same sequence is held
    InWindow,
    /// Still reachable; keep collecting
    Pending,
    /// Too far ahead of the newest live snapshot
    TooNew,
    /// Older than anything the window can still hold
    TooOld,
}

/// Audit artifact files
#[derive(Debug)]
struct AuditLog {
    dir: PathBuf,
    prefix: String,
    update: Option<File>,
}

impl AuditLog {
    fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            update: None,
        }
    }

    async fn open(&self, name: &str) -> Result<File> {
        let path = self.dir.join(format!("{}-{}", self.prefix, name));
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?)
    }

    async fn rotate(&mut self, name: &str) -> Result<()> {
        if let Some(mut old) = self.update.take() {
            old.flush().await?;
        }
        self.update = Some(self.open(&format!("update-{}", name)).await?);
        Ok(())
    }

    async fn write_message(&mut self, msg: &DownstreamMessage) -> Result<()> {
        if self.update.is_none() {
            self.rotate(&format!("{}.log", now_millis())).await?;
        }
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        if let Some(file) = self.update.as_mut() {
            file.write_all(&line).await?;
        }
        Ok(())
    }

    async fn write_snapshot(&self, name: &str, book: &FullOrderBook) -> Result<()> {
        let mut file = self.open(name).await?;
        file.write_all(&serde_json::to_vec(book)?).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Periodic auditor for a [`Builder`]
#[derive(Debug)]
pub struct Verifier<F> {
    builder: Arc<Builder<F>>,
    config: VerifyConfig,
    next_verify: Instant,
    window: BTreeMap<u64, FullOrderBook>,
    fetch: Option<JoinHandle<Result<FullOrderBook>>>,
    reference: Option<FullOrderBook>,
    log: Option<AuditLog>,
    passed: u64,
}

impl<F: SnapshotFetcher> Verifier<F> {
    /// Create a verifier; the first audit starts after `first_delay`
    pub fn new(builder: Arc<Builder<F>>, config: VerifyConfig) -> Self {
        let log = config
            .log_dir
            .as_deref()
            .map(|dir| AuditLog::new(dir, builder.symbol()));
        Self {
            next_verify: Instant::now() + config.first_delay,
            builder,
            config,
            window: BTreeMap::new(),
            fetch: None,
            reference: None,
            log,
            passed: 0,
        }
    }

    /// Number of successful audits
    pub fn passed(&self) -> u64 {
        self.passed
    }

    /// Audit until a mismatch or until `rx` closes.
    ///
    /// # Errors
    ///
    /// [`Error::VerifyMismatch`] when the book disagrees with the venue,
    /// [`Error::Config`] for a missing log directory, [`Error::Io`] when
    /// artifacts cannot be written, and [`Error::TransportClosed`] when the
    /// stream ends.
    pub async fn run(&mut self, rx: &mut mpsc::Receiver<DownstreamMessage>) -> Result<()> {
        self.check_log_dir().await?;
        info!(
            symbol = %self.builder.symbol(),
            frequency_secs = self.config.frequency.as_secs(),
            log_dir = ?self.config.log_dir,
            "start running verify"
        );

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let msg = msg.ok_or(Error::TransportClosed)?;
                    self.on_message(&msg).await?;
                }
                fetched = join_reference(&mut self.fetch), if self.fetch.is_some() => {
                    self.fetch = None;
                    match fetched {
                        Ok(Ok(reference)) => {
                            info!(sequence = reference.sequence, "verify fetched reference snapshot");
                            self.reference = Some(reference);
                            self.check_reference().await?;
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "verify snapshot fetch failed, skipping this round");
                            self.reset(false);
                        }
                        Err(e) => {
                            warn!(error = %e, "verify snapshot task failed, skipping this round");
                            self.reset(false);
                        }
                    }
                }
            }
        }
    }

    async fn check_log_dir(&self) -> Result<()> {
        let Some(dir) = &self.config.log_dir else {
            warn!("verify log directory not set, artifacts disabled");
            return Ok(());
        };
        match fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(Error::Config(format!(
                "verify log directory does not exist: {}",
                dir.display()
            ))),
        }
    }

    async fn on_message(&mut self, msg: &DownstreamMessage) -> Result<()> {
        if let Some(log) = self.log.as_mut() {
            log.write_message(msg).await?;
        }
        if Instant::now() < self.next_verify {
            return Ok(());
        }

        let snapshot = self.builder.snapshot();
        if snapshot.sequence == 0 || self.window.contains_key(&snapshot.sequence) {
            return Ok(());
        }
        self.window.insert(snapshot.sequence, snapshot);

        if self.window.len() == self.config.fetch_after && self.fetch.is_none() {
            info!(snapshots = self.window.len(), "verify requesting reference snapshot");
            self.fetch = Some(self.builder.spawn_full_order_book_fetch());
        }

        self.check_reference().await?;

        if self.window.len() > self.config.window {
            warn!(snapshots = self.window.len(), "verify window full, skipping");
            self.reset(false);
        }
        Ok(())
    }

    fn place(&self, reference: u64) -> Placement {
        if self.window.contains_key(&reference) {
            return Placement::InWindow;
        }
        let Some(&latest) = self.window.keys().next_back() else {
            return Placement::Pending;
        };
        let held = self.window.len() as u64;
        let room = (self.config.window as u64).saturating_sub(held);
        if reference > latest.saturating_add(room) {
            Placement::TooNew
        } else if reference < latest.saturating_sub(held) {
            Placement::TooOld
        } else {
            Placement::Pending
        }
    }

    async fn check_reference(&mut self) -> Result<()> {
        let Some(sequence) = self.reference.as_ref().map(|r| r.sequence) else {
            return Ok(());
        };

        match self.place(sequence) {
            Placement::Pending => Ok(()),
            Placement::TooNew => {
                warn!(reference = sequence, latest = ?self.window.keys().next_back(), "verify reference snapshot too new");
                self.reset(false);
                Ok(())
            }
            Placement::TooOld => {
                warn!(reference = sequence, latest = ?self.window.keys().next_back(), "verify reference snapshot too old");
                self.reset(false);
                Ok(())
            }
            Placement::InWindow => self.audit(sequence).await,
        }
    }

    async fn audit(&mut self, sequence: u64) -> Result<()> {
        let (Some(live), Some(reference)) = (self.window.remove(&sequence), self.reference.take())
        else {
            return Ok(());
        };
        info!(sequence, "verify start comparing");

        if let Some(log) = &self.log {
            log.write_snapshot(&format!("{}.snapshot.json", sequence), &live)
                .await?;
        }

        if let Err(e) = diff_order_book(&live, &reference) {
            if let Some(log) = &self.log {
                log.write_snapshot(
                    &format!("{}.atomicFullOrderBook.json", reference.sequence),
                    &reference,
                )
                .await?;
            }
            error!(sequence, error = %e, "verify order book mismatch");
            return Err(e);
        }

        if let Some(log) = self.log.as_mut() {
            log.rotate(&format!("{}.log", sequence)).await?;
        }
        self.passed += 1;
        info!(sequence, passed = self.passed, "verify success");
        self.reset(true);
        Ok(())
    }

    /// Drop the window and schedule the next audit
    fn reset(&mut self, success: bool) {
        let delay = if success {
            self.config.frequency
        } else {
            self.config.cooldown
        };
        self.next_verify = Instant::now() + delay;
        self.window.clear();
        self.reference = None;
        if let Some(handle) = self.fetch.take() {
            handle.abort();
        }
    }
}

async fn join_reference(
    fetch: &mut Option<JoinHandle<Result<FullOrderBook>>>,
) -> std::result::Result<Result<FullOrderBook>, JoinError> {
    match fetch {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PlaybackConfig};
    use crate::types::DepthResponse;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::future::Future;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedFetcher {
        depth: Mutex<serde_json::Value>,
    }

    impl SnapshotFetcher for FixedFetcher {
        fn fetch_snapshot(&self, _symbol: &str) -> impl Future<Output = Result<DepthResponse>> + Send {
            let value = self.depth.lock().clone();
            async move { Ok(serde_json::from_value(value)?) }
        }
    }

    fn book(sequence: u64, asks: Vec<BookEntry>, bids: Vec<BookEntry>) -> FullOrderBook {
        FullOrderBook {
            sequence,
            asks,
            bids,
        }
    }

    fn entry(id: &str, price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> BookEntry {
        BookEntry(id.to_string(), price, size)
    }

    #[test]
    fn test_diff_accepts_equal_decimals() {
        let live = book(5, vec![entry("a", dec!(1.50), dec!(2.0))], vec![]);
        let reference = book(5, vec![entry("a", dec!(1.5), dec!(2))], vec![]);
        assert!(diff_order_book(&live, &reference).is_ok());
    }

    #[test]
    fn test_diff_reports_first_difference() {
        let live = book(5, vec![entry("a", dec!(1), dec!(2))], vec![]);

        let other_seq = book(6, live.asks.clone(), vec![]);
        let err = diff_order_book(&live, &other_seq).unwrap_err();
        assert!(err.to_string().contains("sequence"));
        assert!(err.is_fatal());

        let other_id = book(5, vec![entry("b", dec!(1), dec!(2))], vec![]);
        assert!(diff_order_book(&live, &other_id)
            .unwrap_err()
            .to_string()
            .contains("order id"));

        let other_size = book(5, vec![entry("a", dec!(1), dec!(3))], vec![]);
        assert!(diff_order_book(&live, &other_size)
            .unwrap_err()
            .to_string()
            .contains("size"));

        let deeper = book(5, live.asks.clone(), vec![entry("b", dec!(0.5), dec!(1))]);
        assert!(diff_order_book(&live, &deeper)
            .unwrap_err()
            .to_string()
            .contains("bids"));
    }

    fn setup(
        reference: serde_json::Value,
        log_dir: Option<&Path>,
    ) -> (Arc<Builder<FixedFetcher>>, VerifyConfig) {
        let config = Config::new("BTC-USDT").with_playback(PlaybackConfig::default());
        let fetcher = Arc::new(FixedFetcher {
            depth: Mutex::new(reference),
        });
        let builder = Arc::new(Builder::new(&config, fetcher));
        builder
            .seed(
                &serde_json::from_value(json!({
                    "sequence": "5",
                    "asks": [["a1", "10.50", "1"]],
                    "bids": [["b1", "10", "2"]]
                }))
                .unwrap(),
            )
            .unwrap();

        let verify = VerifyConfig {
            frequency: Duration::from_secs(3600),
            first_delay: Duration::ZERO,
            cooldown: Duration::from_secs(3600),
            window: 200,
            fetch_after: 1,
            log_dir: log_dir.map(Path::to_path_buf),
        };
        (builder, verify)
    }

    fn tick() -> DownstreamMessage {
        DownstreamMessage::message(
            "/spotMarket/level3:BTC-USDT",
            "received",
            json!({"sequence": 5, "orderId": "x"}),
        )
    }

    #[test]
    fn test_reference_placement() {
        let (builder, config) = setup(json!({}), None);
        let mut verifier = Verifier::new(builder, config);
        for seq in 100..110u64 {
            verifier.window.insert(seq, FullOrderBook::default());
        }

        assert_eq!(verifier.place(105), Placement::InWindow);
        assert_eq!(verifier.place(150), Placement::Pending);
        assert_eq!(verifier.place(109 + 191), Placement::TooNew);
        assert_eq!(verifier.place(98), Placement::TooOld);
        assert_eq!(verifier.place(99), Placement::Pending);
    }

    #[tokio::test]
    async fn test_successful_audit_rotates_log() {
        let dir = TempDir::new().unwrap();
        let (builder, config) = setup(
            json!({"sequence": "5", "asks": [["a1", "10.5", "1.0"]], "bids": [["b1", "10", "2"]]}),
            Some(dir.path()),
        );
        let mut verifier = Verifier::new(builder, config);
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(tick()).await.unwrap();

        let rotated = dir.path().join("BTC-USDT-update-5.log");
        let task = tokio::spawn(async move {
            let result = verifier.run(&mut rx).await;
            (verifier.passed(), result)
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !rotated.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("audit did not complete");
        assert!(dir.path().join("BTC-USDT-5.snapshot.json").exists());

        drop(tx);
        let (passed, result) = task.await.unwrap();
        assert_eq!(passed, 1);
        assert!(matches!(result, Err(Error::TransportClosed)));
    }

    #[tokio::test]
    async fn test_mismatch_is_fatal_and_dumped() {
        let dir = TempDir::new().unwrap();
        let (builder, config) = setup(
            json!({"sequence": "5", "asks": [["a1", "10.5", "3"]], "bids": [["b1", "10", "2"]]}),
            Some(dir.path()),
        );
        let mut verifier = Verifier::new(builder, config);
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(tick()).await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), verifier.run(&mut rx))
            .await
            .expect("verifier did not finish")
            .unwrap_err();
        assert!(matches!(err, Error::VerifyMismatch { sequence: 5, .. }));
        assert!(dir
            .path()
            .join("BTC-USDT-5.atomicFullOrderBook.json")
            .exists());
        assert_eq!(verifier.passed(), 0);
        drop(tx);
    }

    #[tokio::test]
    async fn test_missing_log_dir_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let (builder, config) = setup(json!({}), Some(&missing));
        let mut verifier = Verifier::new(builder, config);
        let (_tx, mut rx) = mpsc::channel(1);

        let err = verifier.run(&mut rx).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
