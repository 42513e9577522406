//! Bitrate adaptation feedback
//!
//! An external ABR controller samples throughput and buffer occupancy on its
//! own schedule and steers the buffer cap (and its encoder's bitrate). The
//! policy lives outside this crate; this is only the seam.

use crate::client::buffer::{ThroughputBuffer, ThroughputSample};

/// Throughput and occupancy signals exposed to an ABR controller
pub trait AbrFeedback: Send + Sync {
    /// Counters since the previous poll; resets them
    fn poll_throughput(&self) -> ThroughputSample;

    /// Bytes queued for the network right now
    fn buffered_bytes(&self) -> usize;

    /// Current cap on queued bytes
    fn buffer_limit(&self) -> usize;

    /// Change the cap; producers blocked on the old cap re-check at once
    fn set_buffer_limit(&self, bytes: usize);
}

impl AbrFeedback for ThroughputBuffer {
    fn poll_throughput(&self) -> ThroughputSample {
        self.poll_stats()
    }

    fn buffered_bytes(&self) -> usize {
        ThroughputBuffer::buffered_bytes(self)
    }

    fn buffer_limit(&self) -> usize {
        ThroughputBuffer::buffer_limit(self)
    }

    fn set_buffer_limit(&self, bytes: usize) {
        ThroughputBuffer::set_buffer_limit(self, bytes)
    }
}
