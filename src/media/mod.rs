//! Media packaging for RTMP
//!
//! This module provides:
//! - Track descriptors, samples and the `onMetaData` builder
//! - H.264/AVC video tags and Annex-B to AVCC conversion
//! - AAC audio tags and AudioSpecificConfig parsing

pub mod aac;
pub mod format;
pub mod h264;

pub use aac::{AacPacketType, AudioSpecificConfig};
pub use format::{AudioFormat, Sample, SampleFlags, Track, VideoFormat};
pub use h264::{AvcConfig, AvcPacketType, NaluType};
