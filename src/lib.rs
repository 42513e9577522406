//! rtmp-publish: RTMP egress for live H.264/AAC streams
//!
//! This library pushes an encoded stream to an RTMP ingest server:
//! - Client handshake and the connect/releaseStream/createStream/publish
//!   command sequence
//! - Chunk framing with Set Chunk Size and acknowledgement window tracking
//! - H.264 (Annex-B or length-prefixed) and AAC sequence headers and frames
//! - Timestamp continuity across reconnects through a pluggable store
//! - Throughput-coupled buffering with feedback for bitrate adaptation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use rtmp_publish::{AudioFormat, MemoryStore, PublisherConfig, RtmpPublisher, Sample, VideoFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PublisherConfig::new("rtmp://localhost/live", "stream-key");
//!     let audio = AudioFormat::new(44100, 2, 128_000);
//!     let video = VideoFormat::new(1280, 720, 2_500_000, 30.0);
//!
//!     let (mut publisher, _events) =
//!         RtmpPublisher::start(config, Arc::new(MemoryStore::new()), &audio, &video).await?;
//!
//!     publisher.set_video_config(Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x64, 0, 0x1F, 0, 0, 0, 1, 0x68, 0xEE]))?;
//!     publisher.set_audio_config(Bytes::from_static(&[0x12, 0x10]))?;
//!
//!     let frame = Sample::video(Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]), true, 0);
//!     publisher.send_sample(&frame).await?;
//!
//!     publisher.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod stats;

// Re-export main types for convenience
pub use client::{PublisherConfig, PublisherEvent, RtmpPublisher, SampleDisposition};
pub use error::{Error, Result};
pub use media::format::{AudioFormat, Sample, SampleFlags, VideoFormat};
pub use session::{FileStore, KeyValueStore, MemoryStore};
pub use stats::AbrFeedback;
