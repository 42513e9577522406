//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Client handshake (C0C1 and optional C2)
//! - Chunk stream multiplexing and demultiplexing
//! - Message framing and parsing
//! - Flow-control window accounting

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;
pub mod window;

pub use chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
pub use handshake::Handshake;
pub use message::{Command, DataMessage, RtmpMessage};
pub use window::{LimitType, WindowTracker};
