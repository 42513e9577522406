//! Flow-control window tracking
//!
//! Counts bytes handed to the network writer and the last sequence number the
//! server acknowledged. The counters are read from the inbound reader task and
//! written from the sending side, so they live in atomics.
//!
//! Peer bandwidth messages are resolved with the usual precedence:
//! a hard limit always applies, a soft limit only applies when it shrinks the
//! window, and a dynamic limit behaves like a hard one only if the last applied
//! limit was hard.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::protocol::constants::{
    BANDWIDTH_LIMIT_DYNAMIC, BANDWIDTH_LIMIT_HARD, BANDWIDTH_LIMIT_SOFT, DEFAULT_WINDOW_ACK_SIZE,
};

/// Limit type carried by Set Peer Bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Hard,
    Soft,
    Dynamic,
}

impl LimitType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            BANDWIDTH_LIMIT_HARD => Some(LimitType::Hard),
            BANDWIDTH_LIMIT_SOFT => Some(LimitType::Soft),
            BANDWIDTH_LIMIT_DYNAMIC => Some(LimitType::Dynamic),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            LimitType::Hard => BANDWIDTH_LIMIT_HARD,
            LimitType::Soft => BANDWIDTH_LIMIT_SOFT,
            LimitType::Dynamic => BANDWIDTH_LIMIT_DYNAMIC,
        }
    }
}

const NO_LIMIT_APPLIED: u8 = u8::MAX;

/// Sent/acknowledged byte counters plus the negotiated window
#[derive(Debug)]
pub struct WindowTracker {
    bytes_sent: AtomicU64,
    bytes_acknowledged: AtomicU64,
    window: AtomicU32,
    last_limit: AtomicU8,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW_ACK_SIZE)
    }

    pub fn with_window(window: u32) -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_acknowledged: AtomicU64::new(0),
            window: AtomicU32::new(window),
            last_limit: AtomicU8::new(NO_LIMIT_APPLIED),
        }
    }

    /// Record bytes of a message handed to the writer
    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Release);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    /// Record the sequence number from an Acknowledgement message
    pub fn set_bytes_acknowledged(&self, n: u64) {
        self.bytes_acknowledged.store(n, Ordering::Release);
    }

    pub fn bytes_acknowledged(&self) -> u64 {
        self.bytes_acknowledged.load(Ordering::Acquire)
    }

    pub fn window(&self) -> u32 {
        self.window.load(Ordering::Acquire)
    }

    /// Limit type of the last applied Set Peer Bandwidth, if any
    pub fn last_limit(&self) -> Option<LimitType> {
        LimitType::from_u8(self.last_limit.load(Ordering::Acquire))
    }

    /// Set the window directly (our own Window Acknowledgement Size)
    pub fn set_window(&self, window: u32) {
        self.window.store(window, Ordering::Release);
    }

    /// Apply a Set Peer Bandwidth request
    ///
    /// Returns true when the window changed as a result, in which case the
    /// caller should announce the new window to the peer.
    pub fn apply_window(&self, size: u32, limit: LimitType) -> bool {
        let current = self.window();
        let effective = match limit {
            LimitType::Hard => LimitType::Hard,
            LimitType::Soft if size < current => LimitType::Soft,
            LimitType::Soft => return false,
            LimitType::Dynamic if self.last_limit() == Some(LimitType::Hard) => LimitType::Hard,
            LimitType::Dynamic => return false,
        };

        self.window.store(size, Ordering::Release);
        self.last_limit.store(effective.as_u8(), Ordering::Release);
        true
    }

    fn unacknowledged(&self) -> u64 {
        self.bytes_sent().saturating_sub(self.bytes_acknowledged())
    }

    /// Three quarters of the window is outstanding
    pub fn ack_needed(&self) -> bool {
        self.unacknowledged() * 4 >= u64::from(self.window()) * 3
    }

    /// More than one and a half windows are outstanding
    pub fn discard_needed(&self) -> bool {
        self.unacknowledged() * 2 > u64::from(self.window()) * 3
    }
}

impl Default for WindowTracker {
    fn default() -> Self {
        Self::new()
    }
}
