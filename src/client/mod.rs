//! RTMP publisher
//!
//! Pushes a live H.264/AAC stream to an RTMP ingest server:
//! - connection setup, handshake and the publish command sequence
//! - chunk framing of metadata and media samples
//! - throughput-coupled send buffering with a single network writer
//! - an inbound task answering the server's control traffic

pub mod buffer;
pub mod config;
pub mod connector;
pub mod events;
pub mod inbound;
pub mod publisher;
pub mod writer;

pub use buffer::{ChunkSink, ThroughputBuffer, ThroughputSample};
pub use config::{ParsedUrl, PublisherConfig};
pub use events::PublisherEvent;
pub use publisher::RtmpPublisher;
pub use writer::{ChunkStreamWriter, SampleDisposition};
