//! Statistics for a publish session

use std::time::{Duration, Instant};

use crate::client::writer::SampleDisposition;

/// Per-sample counters kept by the publisher
#[derive(Debug, Clone)]
pub struct PublishStats {
    /// When the publisher started
    pub started_at: Instant,
    /// Video frames sent
    pub video_frames: u64,
    /// Audio frames sent
    pub audio_frames: u64,
    /// Key frames sent
    pub keyframes: u64,
    /// Samples dropped while waiting for the first key frame
    pub dropped_awaiting_keyframe: u64,
    /// Samples dropped for preceding the stream start
    pub dropped_too_early: u64,
    /// Codec config and empty samples dropped
    pub dropped_other: u64,
}

impl Default for PublishStats {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            video_frames: 0,
            audio_frames: 0,
            keyframes: 0,
            dropped_awaiting_keyframe: 0,
            dropped_too_early: 0,
            dropped_other: 0,
        }
    }
}

impl PublishStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the outcome of one sample
    pub fn record(&mut self, audio: bool, key_frame: bool, disposition: SampleDisposition) {
        match disposition {
            SampleDisposition::Sent if audio => self.audio_frames += 1,
            SampleDisposition::Sent => {
                self.video_frames += 1;
                if key_frame {
                    self.keyframes += 1;
                }
            }
            SampleDisposition::DroppedAwaitingKeyFrame => self.dropped_awaiting_keyframe += 1,
            SampleDisposition::DroppedTooEarly => self.dropped_too_early += 1,
            SampleDisposition::DroppedConfig | SampleDisposition::DroppedEmpty => {
                self.dropped_other += 1
            }
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_awaiting_keyframe + self.dropped_too_early + self.dropped_other
    }

    /// Get duration since the publisher started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Calculate video framerate
    pub fn calculated_framerate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.video_frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Point-in-time view of a publisher
#[derive(Debug, Clone)]
pub struct PublisherSnapshot {
    pub samples: PublishStats,
    /// Bytes handed to the network writer, headers included
    pub bytes_sent: u64,
    /// Last sequence number the server acknowledged
    pub bytes_acknowledged: u64,
    /// Current acknowledgement window
    pub window: u32,
    /// Bytes queued for the socket
    pub buffered_bytes: usize,
    /// Cap on queued bytes
    pub buffer_limit: usize,
    /// Unacknowledged bytes reached three quarters of the window
    pub ack_needed: bool,
    /// Unacknowledged bytes exceed one and a half windows
    pub discard_needed: bool,
}
