//! Snapshot/stream alignment.
//!
//! The REST snapshot and the delta stream are fetched independently and share
//! no resume token. [`Playback`] buffers deltas until a snapshot arrives whose
//! sequence falls inside the buffered range, then hands both back so the
//! builder can seed the book and replay the buffer.
//!
//! This is a plain state machine with no I/O. It tells the caller when to
//! fetch a snapshot; the caller runs the fetch and reports the result back
//! through [`Playback::offer_snapshot`] or [`Playback::fetch_failed`].

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::PlaybackConfig;
use crate::error::Error;
use crate::types::{DepthResponse, StreamMessage};
use crate::Result;

/// What the caller should do after buffering a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    /// Keep feeding deltas
    Buffering,
    /// Start one snapshot fetch
    FetchSnapshot,
    /// A usable snapshot is held; call [`Playback::into_parts`]
    Ready,
}

/// Outcome of offering a fetched snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotVerdict {
    /// Older than the first buffered delta; dropped
    Stale,
    /// Newer than every buffered delta; held until the stream catches up
    Early,
    /// Within the buffered range
    Ready,
}

/// Delta buffer waiting for a usable snapshot
#[derive(Debug)]
pub struct Playback {
    config: PlaybackConfig,
    buffer: VecDeque<StreamMessage>,
    snapshot: Option<(u64, DepthResponse)>,
    fetch_in_flight: bool,
}

impl Playback {
    /// Create an empty playback buffer
    #[must_use]
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            buffer: VecDeque::with_capacity(config.buffer_capacity),
            snapshot: None,
            fetch_in_flight: false,
        }
    }

    /// Number of buffered deltas
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Sequence of the oldest buffered delta
    #[must_use]
    pub fn first_sequence(&self) -> Option<u64> {
        self.buffer.front().map(|m| m.sequence)
    }

    /// Sequence of the newest buffered delta
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.buffer.back().map(|m| m.sequence)
    }

    /// Whether a snapshot fetch is outstanding
    #[must_use]
    pub fn fetch_in_flight(&self) -> bool {
        self.fetch_in_flight
    }

    /// Buffer one delta.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PlaybackOverflow`] once the buffer is within the
    /// overflow margin of its capacity without a usable snapshot.
    pub fn push(&mut self, msg: StreamMessage) -> Result<PlaybackAction> {
        self.buffer.push_back(msg);

        if self.is_ready() {
            return Ok(PlaybackAction::Ready);
        }

        let limit = self
            .config
            .buffer_capacity
            .saturating_sub(self.config.overflow_margin);
        if self.buffer.len() > limit {
            return Err(Error::PlaybackOverflow {
                buffered: self.buffer.len(),
                capacity: self.config.buffer_capacity,
            });
        }

        if self.buffer.len() >= self.config.min_buffered
            && self.snapshot.is_none()
            && !self.fetch_in_flight
        {
            self.fetch_in_flight = true;
            return Ok(PlaybackAction::FetchSnapshot);
        }

        Ok(PlaybackAction::Buffering)
    }

    /// Report a fetched snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySequence`] if the snapshot has no sequence; the
    /// fetch slot is released so the next delta requests another.
    pub fn offer_snapshot(&mut self, depth: DepthResponse) -> Result<SnapshotVerdict> {
        self.fetch_in_flight = false;
        let sequence = depth.sequence()?;

        if let Some(first) = self.first_sequence() {
            if sequence < first {
                warn!(
                    snapshot = sequence,
                    first_buffered = first,
                    "snapshot sequence is too small, refetching"
                );
                return Ok(SnapshotVerdict::Stale);
            }
        }

        self.snapshot = Some((sequence, depth));
        if self.is_ready() {
            Ok(SnapshotVerdict::Ready)
        } else {
            debug!(
                snapshot = sequence,
                last_buffered = ?self.last_sequence(),
                "snapshot ahead of stream, waiting for deltas"
            );
            Ok(SnapshotVerdict::Early)
        }
    }

    /// Release the fetch slot after a failed fetch
    pub fn fetch_failed(&mut self) {
        self.fetch_in_flight = false;
    }

    /// Whether a held snapshot falls within the buffered range
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match (&self.snapshot, self.last_sequence()) {
            (Some((sequence, _)), Some(last)) => *sequence <= last,
            _ => false,
        }
    }

    /// Take the snapshot and the buffered deltas, oldest first.
    ///
    /// Returns `None` unless [`is_ready`](Self::is_ready).
    pub fn into_parts(self) -> Option<(DepthResponse, VecDeque<StreamMessage>)> {
        if !self.is_ready() {
            return None;
        }
        let (_, depth) = self.snapshot?;
        Some((depth, self.buffer))
    }
}
