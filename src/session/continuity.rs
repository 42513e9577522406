//! Timestamp continuity across reconnects
//!
//! Ingest servers and players get confused when a republished stream starts
//! again at timestamp zero shortly after the previous one. The last adjusted
//! timestamp is persisted while a stream is young; if the next stream starts
//! before the previous one reached the threshold, its timestamps are shifted
//! past anything the server may still hold.
//!
//! Persistence runs on its own task, fed through a `watch` channel, so the
//! media path never waits on storage.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::session::store::KeyValueStore;

/// Streams younger than this are shifted on the next start
pub const CONTINUITY_THRESHOLD_MS: u32 = 15_000;

/// Minimum spacing between two persisted values
pub const SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Default store key
pub const DEFAULT_TIMESTAMP_KEY: &str = "rtmp.last_timestamp";

/// Maps capture-clock milliseconds to stream timestamps
#[derive(Debug)]
pub struct TimestampContinuity {
    store: Arc<dyn KeyValueStore>,
    key: String,
    start_ms: i64,
    adjustment_ms: i64,
    should_save: bool,
    last_save: Option<Instant>,
    saver: watch::Sender<Option<u32>>,
}

impl TimestampContinuity {
    /// Create the manager and spawn its persistence task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, DEFAULT_TIMESTAMP_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let (saver, rx) = watch::channel(None);
        tokio::spawn(persist_task(rx, store.clone(), key.clone()));

        Self {
            store,
            key,
            start_ms: 0,
            adjustment_ms: 0,
            should_save: false,
            last_save: None,
            saver,
        }
    }

    /// Begin a new stream whose first frame is at `start_ms`
    pub fn start_new_stream(&mut self, start_ms: i64) {
        let last_saved = self
            .store
            .get(&self.key)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(CONTINUITY_THRESHOLD_MS);

        self.adjustment_ms = if last_saved >= CONTINUITY_THRESHOLD_MS {
            0
        } else {
            i64::from(last_saved) + 2 * i64::from(CONTINUITY_THRESHOLD_MS)
        };
        self.start_ms = start_ms;
        self.should_save = true;
        self.last_save = None;

        tracing::debug!(
            start_ms = start_ms,
            last_saved = last_saved,
            adjustment_ms = self.adjustment_ms,
            "Starting timestamp continuity session"
        );
    }

    /// Convert a capture timestamp into a stream timestamp
    ///
    /// Timestamps before the stream start are rejected; callers drop the
    /// sample and carry on.
    pub fn adjust_timestamp(&mut self, raw_ms: i64) -> Result<u32> {
        if raw_ms < self.start_ms {
            return Err(Error::TimestampOutOfRange {
                raw_ms,
                start_ms: self.start_ms,
            });
        }

        let adjusted = ((raw_ms - self.start_ms) + self.adjustment_ms) as u32;
        self.maybe_save(adjusted);
        Ok(adjusted)
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn adjustment_ms(&self) -> i64 {
        self.adjustment_ms
    }

    /// Whether adjusted timestamps are still being persisted
    pub fn is_saving(&self) -> bool {
        self.should_save
    }

    fn maybe_save(&mut self, adjusted: u32) {
        if !self.should_save {
            return;
        }

        let now = Instant::now();
        if let Some(last) = self.last_save {
            if now.duration_since(last) < SAVE_INTERVAL {
                return;
            }
        }

        self.saver.send_replace(Some(adjusted));
        self.last_save = Some(now);

        if adjusted >= CONTINUITY_THRESHOLD_MS {
            self.should_save = false;
        }
    }
}

async fn persist_task(
    mut rx: watch::Receiver<Option<u32>>,
    store: Arc<dyn KeyValueStore>,
    key: String,
) {
    while rx.changed().await.is_ok() {
        let value = *rx.borrow_and_update();
        let Some(value) = value else { continue };

        if let Err(e) = store.put(&key, value.to_string()).await {
            tracing::warn!(key = %key, error = %e, "Failed to persist timestamp");
        }
    }
    tracing::trace!(key = %key, "Timestamp persistence task exiting");
}
