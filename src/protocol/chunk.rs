//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a header
//! that identifies the chunk stream and message being sent.
//!
//! ```text
//! Chunk Format:
//! +-------------+----------------+-------------------+
//! | Basic Header| Message Header | Chunk Data        |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)       |
//! +-------------+----------------+-------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 320-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4, LE)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) is appended when timestamp >= 0xFFFFFF,
//! on the first chunk and on every continuation chunk of that message.
//! ```
//!
//! The encoder only ever emits type 0 for the first chunk of a message and
//! type 3 for its continuations. The decoder accepts all four formats since
//! servers use them freely.
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message (reassembled from chunks, or about to be chunked)
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpChunk {
    /// Chunk stream ID (for multiplexing)
    pub csid: u32,
    /// Message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

/// Per-chunk-stream state for reassembly
#[derive(Debug, Clone, Default)]
struct ChunkStreamState {
    /// Last timestamp (absolute)
    timestamp: u32,
    /// Last timestamp delta
    timestamp_delta: u32,
    /// Last message length
    message_length: u32,
    /// Last message type
    message_type: u8,
    /// Last message stream ID
    stream_id: u32,
    /// Whether the current message carries an extended timestamp
    has_extended_timestamp: bool,
    /// A message is partially received on this stream
    in_progress: bool,
    /// Buffer for partial message reassembly
    partial_message: BytesMut,
}

enum ChunkProgress {
    NeedMore,
    Partial,
    Complete(RtmpChunk),
}

/// Chunk stream decoder
///
/// Handles chunk demultiplexing and message reassembly. Input is only
/// consumed once a whole chunk is available.
pub struct ChunkDecoder {
    /// Maximum incoming chunk size
    chunk_size: u32,
    /// Per-chunk-stream state
    streams: HashMap<u32, ChunkStreamState>,
    /// Maximum message size (sanity limit)
    max_message_size: u32,
}

impl ChunkDecoder {
    /// Create a new decoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_VALID_LENGTH,
        }
    }

    /// Set the chunk size (called when receiving SetChunkSize message)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_VALID_LENGTH);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Try to decode a complete message from the buffer
    ///
    /// Returns Ok(Some(chunk)) if a complete message was decoded,
    /// Ok(None) if more data is needed, or Err on protocol error.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpChunk>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkProgress::NeedMore => return Ok(None),
                ChunkProgress::Partial => continue,
                ChunkProgress::Complete(chunk) => return Ok(Some(chunk)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkProgress> {
        let (fmt, csid, basic_len) = match parse_basic_header(buf) {
            Some(v) => v,
            None => return Ok(ChunkProgress::NeedMore),
        };

        let msg_header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + msg_header_len {
            return Ok(ChunkProgress::NeedMore);
        }

        let chunk_size = self.chunk_size as usize;
        let max_message_size = self.max_message_size;
        let state = self.streams.entry(csid).or_default();

        let mut header = &buf[basic_len..basic_len + msg_header_len];
        let (timestamp_field, message_length, message_type, stream_id) = match fmt {
            0 => {
                let ts = header.get_uint(3) as u32;
                let len = header.get_uint(3) as u32;
                let typ = header.get_u8();
                let sid = header.get_u32_le(); // Stream ID is little-endian!
                (ts, len, typ, sid)
            }
            1 => {
                let ts = header.get_uint(3) as u32;
                let len = header.get_uint(3) as u32;
                let typ = header.get_u8();
                (ts, len, typ, state.stream_id)
            }
            2 => {
                let ts = header.get_uint(3) as u32;
                (ts, state.message_length, state.message_type, state.stream_id)
            }
            _ => (
                state.timestamp_delta,
                state.message_length,
                state.message_type,
                state.stream_id,
            ),
        };

        let has_extended = if fmt == CHUNK_FMT_3 {
            state.has_extended_timestamp
        } else {
            timestamp_field >= EXTENDED_TIMESTAMP_THRESHOLD
        };
        let header_len = basic_len + msg_header_len + if has_extended { 4 } else { 0 };
        if buf.len() < header_len {
            return Ok(ChunkProgress::NeedMore);
        }

        let timestamp_value = if has_extended {
            let mut ext = &buf[basic_len + msg_header_len..header_len];
            ext.get_u32()
        } else {
            timestamp_field
        };

        if message_length > max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: message_length as usize,
                max: max_message_size,
            }
            .into());
        }

        let continuation = fmt == CHUNK_FMT_3 && state.in_progress;
        let remaining = if continuation {
            state.message_length as usize - state.partial_message.len()
        } else {
            message_length as usize
        };
        let data_len = remaining.min(chunk_size);
        if buf.len() < header_len + data_len {
            return Ok(ChunkProgress::NeedMore);
        }

        buf.advance(header_len);

        if !continuation {
            let absolute = if fmt == CHUNK_FMT_0 {
                timestamp_value
            } else {
                state.timestamp.wrapping_add(timestamp_value)
            };
            state.timestamp = absolute;
            state.timestamp_delta = timestamp_value;
            state.message_length = message_length;
            state.message_type = message_type;
            state.stream_id = stream_id;
            state.has_extended_timestamp = has_extended;
            state.in_progress = true;
            state.partial_message.clear();
            state.partial_message.reserve(message_length as usize);
        }

        state.partial_message.put_slice(&buf[..data_len]);
        buf.advance(data_len);

        if state.partial_message.len() >= state.message_length as usize {
            state.in_progress = false;
            Ok(ChunkProgress::Complete(RtmpChunk {
                csid,
                timestamp: state.timestamp,
                message_type: state.message_type,
                stream_id: state.stream_id,
                payload: state.partial_message.split().freeze(),
            }))
        } else {
            Ok(ChunkProgress::Partial)
        }
    }

    /// Abort a message on a chunk stream (when receiving Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial_message.clear();
            state.in_progress = false;
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse basic header and return (fmt, csid, header_length)
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = (first >> 6) & 0x03;

    match first & 0x3F {
        0 => {
            // 2-byte header: csid = 64 + second byte
            let second = *buf.get(1)?;
            Some((fmt, 64 + second as u32, 2))
        }
        1 => {
            // 3-byte header: csid = 64 + second + third*256
            if buf.len() < 3 {
                return None;
            }
            Some((fmt, 64 + buf[1] as u32 + (buf[2] as u32) * 256, 3))
        }
        low => Some((fmt, low as u32, 1)),
    }
}

/// Chunk stream encoder
///
/// Encodes messages into chunks for transmission. The chunk size is read
/// once per message, so a size change never splits one message two ways.
pub struct ChunkEncoder {
    /// Outgoing chunk size
    chunk_size: u32,
}

impl ChunkEncoder {
    /// Create a new encoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the chunk size used for messages encoded from now on
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        validate_chunk_size(size)?;
        self.chunk_size = size;
        Ok(())
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a message into chunks
    ///
    /// All validation happens before anything is appended to `buf`.
    pub fn encode(&self, chunk: &RtmpChunk, buf: &mut BytesMut) -> Result<()> {
        validate_chunk_stream_id(chunk.csid)?;
        if chunk.message_type == 0 {
            return Err(ProtocolError::InvalidMessageType(chunk.message_type).into());
        }
        let payload_len = chunk.payload.len();
        if payload_len > MAX_VALID_LENGTH as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_len,
                max: MAX_VALID_LENGTH,
            }
            .into());
        }

        let chunk_size = self.chunk_size as usize;
        let needs_extended = chunk.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
        let timestamp_field = if needs_extended {
            EXTENDED_TIMESTAMP_THRESHOLD
        } else {
            chunk.timestamp
        };

        let chunk_count = payload_len.div_ceil(chunk_size).max(1);
        buf.reserve(payload_len + 18 + (chunk_count - 1) * 7);

        // First chunk: full header
        write_basic_header(chunk.csid, CHUNK_FMT_0, buf);
        write_u24(timestamp_field, buf);
        write_u24(payload_len as u32, buf);
        buf.put_u8(chunk.message_type);
        buf.put_u32_le(chunk.stream_id);
        if needs_extended {
            buf.put_u32(chunk.timestamp);
        }

        let first_len = payload_len.min(chunk_size);
        buf.put_slice(&chunk.payload[..first_len]);

        // Continuation chunks
        let mut offset = first_len;
        while offset < payload_len {
            let chunk_data_len = (payload_len - offset).min(chunk_size);
            write_basic_header(chunk.csid, CHUNK_FMT_3, buf);
            if needs_extended {
                buf.put_u32(chunk.timestamp);
            }
            buf.put_slice(&chunk.payload[offset..offset + chunk_data_len]);
            offset += chunk_data_len;
        }

        Ok(())
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a chunk size against `[MIN_CHUNK_SIZE, MAX_VALID_LENGTH]`
pub fn validate_chunk_size(size: u32) -> Result<()> {
    if !(MIN_CHUNK_SIZE..=MAX_VALID_LENGTH).contains(&size) {
        return Err(ProtocolError::InvalidChunkSize(size).into());
    }
    Ok(())
}

fn validate_chunk_stream_id(csid: u32) -> Result<()> {
    // 0 and 1 are the escape codes of the 2- and 3-byte basic headers
    if !(2..=MAX_CHUNK_STREAM_ID).contains(&csid) {
        return Err(ProtocolError::InvalidChunkStreamId(csid).into());
    }
    Ok(())
}

/// Write basic header
fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        // 3-byte header
        buf.put_u8((fmt << 6) | 1);
        let csid_offset = csid - 64;
        buf.put_u8((csid_offset & 0xFF) as u8);
        buf.put_u8(((csid_offset >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        // 2-byte header
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        // 1-byte header
        buf.put_u8((fmt << 6) | (csid as u8));
    }
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn message(csid: u32, timestamp: u32, len: usize) -> RtmpChunk {
        RtmpChunk {
            csid,
            timestamp,
            message_type: MSG_VIDEO,
            stream_id: STREAM_ID_PUBLISH,
            payload: Bytes::from((0..len).map(|i| i as u8).collect::<Vec<u8>>()),
        }
    }

    fn roundtrip(original: &RtmpChunk, chunk_size: u32) -> RtmpChunk {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        encoder.set_chunk_size(chunk_size).unwrap();
        decoder.set_chunk_size(chunk_size);

        let mut encoded = BytesMut::new();
        encoder.encode(original, &mut encoded).unwrap();
        let decoded = decoder.decode(&mut encoded).unwrap().unwrap();
        assert!(encoded.is_empty());
        decoded
    }

    #[test]
    fn test_basic_header_parsing() {
        assert_eq!(parse_basic_header(&[0x03]), Some((0, 3, 1)));
        assert_eq!(parse_basic_header(&[0xC6]), Some((3, 6, 1)));
        assert_eq!(parse_basic_header(&[0x00, 0x00]), Some((0, 64, 2)));
        assert_eq!(parse_basic_header(&[0x01, 0x00, 0x01]), Some((0, 320, 3)));
        assert_eq!(parse_basic_header(&[0x00]), None);
        assert_eq!(parse_basic_header(&[]), None);
    }

    #[test]
    fn test_basic_header_ranges() {
        for (csid, expected) in [(63u32, 1usize), (64, 2), (319, 2), (320, 3), (65599, 3)] {
            let mut buf = BytesMut::new();
            write_basic_header(csid, CHUNK_FMT_0, &mut buf);
            assert_eq!(buf.len(), expected, "csid {}", csid);
            assert_eq!(parse_basic_header(&buf), Some((0, csid, expected)));
        }
    }

    #[test]
    fn test_invalid_chunk_stream_id() {
        let encoder = ChunkEncoder::new();
        let mut buf = BytesMut::new();
        for csid in [0, 1, 65600] {
            let err = encoder.encode(&message(csid, 0, 4), &mut buf).unwrap_err();
            assert!(matches!(
                err,
                Error::Protocol(ProtocolError::InvalidChunkStreamId(id)) if id == csid
            ));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_roundtrip_wide_channels() {
        for csid in [2u32, 63, 64, 319, 320, 65599] {
            let original = message(csid, 1000, 300);
            assert_eq!(roundtrip(&original, 128), original);
        }
    }

    #[test]
    fn test_zero_length_message() {
        let original = message(CSID_VIDEO, 40, 0);
        let mut encoded = BytesMut::new();
        ChunkEncoder::new().encode(&original, &mut encoded).unwrap();
        // Basic header + full message header, no data
        assert_eq!(encoded.len(), 12);
        assert_eq!(roundtrip(&original, 128), original);
    }

    #[test]
    fn test_max_length_message() {
        let original = message(CSID_VIDEO, 0, MAX_VALID_LENGTH as usize);
        let decoded = roundtrip(&original, RECOMMENDED_CHUNK_SIZE);
        assert_eq!(decoded.payload.len(), 0xFFFFFF);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_oversized_message_rejected_before_writing() {
        let original = message(CSID_VIDEO, 0, MAX_VALID_LENGTH as usize + 1);
        let mut buf = BytesMut::new();
        let err = ChunkEncoder::new().encode(&original, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MessageTooLarge { size: 0x1000000, .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_extended_timestamp() {
        let original = message(CSID_AUDIO, EXTENDED_TIMESTAMP_THRESHOLD, 300);
        let mut encoded = BytesMut::new();
        ChunkEncoder::new().encode(&original, &mut encoded).unwrap();

        // Timestamp field carries the sentinel, followed by the real value
        assert_eq!(&encoded[1..4], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&encoded[12..16], &EXTENDED_TIMESTAMP_THRESHOLD.to_be_bytes());

        // Continuation chunk at offset 16 + 128 repeats the extended timestamp
        let second = 16 + 128;
        assert_eq!(encoded[second], 0xC0 | CSID_AUDIO as u8);
        assert_eq!(&encoded[second + 1..second + 5], &EXTENDED_TIMESTAMP_THRESHOLD.to_be_bytes());

        assert_eq!(roundtrip(&original, 128), original);

        let later = message(CSID_AUDIO, 0x1234_5678, 10);
        assert_eq!(roundtrip(&later, 128), later);
    }

    #[test]
    fn test_below_extended_threshold() {
        let original = message(CSID_AUDIO, EXTENDED_TIMESTAMP_THRESHOLD - 1, 10);
        let mut encoded = BytesMut::new();
        ChunkEncoder::new().encode(&original, &mut encoded).unwrap();
        assert_eq!(&encoded[1..4], &[0xFF, 0xFF, 0xFE]);
        assert_eq!(encoded.len(), 12 + 10);
    }

    #[test]
    fn test_fragments_never_exceed_chunk_size() {
        for chunk_size in [128u32, 129, 500, 4096] {
            for len in [0usize, 1, 127, 128, 129, 256, 1000, 9000] {
                let original = message(CSID_VIDEO, 33, len);
                let mut encoder = ChunkEncoder::new();
                encoder.set_chunk_size(chunk_size).unwrap();
                let mut encoded = BytesMut::new();
                encoder.encode(&original, &mut encoded).unwrap();

                // Walk the chunks: 12-byte header first, 1-byte continuation headers after
                let mut pos = 12;
                let mut remaining = len;
                let mut fragments = Vec::new();
                loop {
                    let take = remaining.min(chunk_size as usize);
                    fragments.push(take);
                    pos += take;
                    remaining -= take;
                    if remaining == 0 {
                        break;
                    }
                    assert_eq!(encoded[pos], 0xC0 | CSID_VIDEO as u8);
                    pos += 1;
                }
                assert_eq!(pos, encoded.len());
                assert!(fragments.iter().all(|f| *f <= chunk_size as usize));
                assert_eq!(fragments.iter().sum::<usize>(), len);
            }
        }
    }

    #[test]
    fn test_chunk_size_validation() {
        let mut encoder = ChunkEncoder::new();
        assert!(encoder.set_chunk_size(127).is_err());
        assert!(encoder.set_chunk_size(MAX_VALID_LENGTH + 1).is_err());
        assert_eq!(encoder.chunk_size(), DEFAULT_CHUNK_SIZE);
        encoder.set_chunk_size(MAX_VALID_LENGTH).unwrap();
        assert_eq!(encoder.chunk_size(), MAX_VALID_LENGTH);
    }

    #[test]
    fn test_interleaved_channels() {
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let video = message(CSID_VIDEO, 10, 200);
        let audio = message(CSID_AUDIO, 12, 50);

        let mut video_bytes = BytesMut::new();
        encoder.encode(&video, &mut video_bytes).unwrap();
        let mut audio_bytes = BytesMut::new();
        encoder.encode(&audio, &mut audio_bytes).unwrap();

        // First video chunk, the whole audio message, then the video continuation
        let mut wire = BytesMut::new();
        wire.put_slice(&video_bytes[..12 + 128]);
        wire.put_slice(&audio_bytes);
        wire.put_slice(&video_bytes[12 + 128..]);

        assert_eq!(decoder.decode(&mut wire).unwrap().unwrap(), audio);
        assert_eq!(decoder.decode(&mut wire).unwrap().unwrap(), video);
        assert!(decoder.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn test_partial_input_is_not_consumed() {
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let original = message(CSID_COMMAND, 0, 100);
        let mut full = BytesMut::new();
        encoder.encode(&original, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..50]);
        assert!(decoder.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 50);

        partial.put_slice(&full[50..]);
        assert_eq!(decoder.decode(&mut partial).unwrap().unwrap(), original);
    }

    #[test]
    fn test_decode_compressed_headers() {
        // A server-style sequence: type 0, then type 2 (delta only), then type 3
        let mut wire = BytesMut::new();
        wire.put_slice(&[0x04, 0, 0, 100, 0, 0, 2, MSG_AUDIO, 1, 0, 0, 0, 0xAA, 0xBB]);
        wire.put_slice(&[0x84, 0, 0, 20, 0xCC, 0xDD]);
        wire.put_slice(&[0xC4, 0xEE, 0xFF]);

        let mut decoder = ChunkDecoder::new();
        let first = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(first.timestamp, 100);
        assert_eq!(first.stream_id, 1);
        let second = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(second.timestamp, 120);
        assert_eq!(&second.payload[..], &[0xCC, 0xDD]);
        let third = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(third.timestamp, 140);
        assert_eq!(third.message_type, MSG_AUDIO);
    }
}
