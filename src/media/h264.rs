//! H.264/AVC packaging
//!
//! Encoders hand over H.264 in Annex-B form (start-code delimited NAL units).
//! RTMP transports H.264 in AVCC form (length-prefixed NAL units) behind a
//! small video tag.
//!
//! AVC Video Packet Structure:
//! ```text
//! +----------+----------+-----------------+
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+
//! ```
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// FLV codec id for AVC
pub const VIDEO_CODEC_AVC: u8 = 7;

/// FLV frame type for key frames
pub const FRAME_TYPE_KEY: u8 = 1;

/// FLV frame type for inter frames
pub const FRAME_TYPE_INTER: u8 = 2;

/// Size of the video tag written before AVC payloads
pub const VIDEO_TAG_SIZE: usize = 5;

/// Length prefix written before each NAL unit
pub const NALU_LENGTH_SIZE: u8 = 4;

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    /// NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            _ => None,
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// Whether `codec_id` is a video codec id defined for FLV tags (2..=7)
pub fn is_known_video_codec(codec_id: u8) -> bool {
    (2..=VIDEO_CODEC_AVC).contains(&codec_id)
}

/// First byte of every video tag: frame type and codec id
pub fn video_tag_byte(keyframe: bool, codec_id: u8) -> u8 {
    let frame_type = if keyframe { FRAME_TYPE_KEY } else { FRAME_TYPE_INTER };
    (frame_type << 4) | (codec_id & 0x0F)
}

/// Write the 5-byte AVC video tag
///
/// Composition time is always zero; the publisher sends frames in
/// presentation order.
pub fn write_video_tag(buf: &mut BytesMut, keyframe: bool, packet_type: AvcPacketType) {
    buf.put_u8(video_tag_byte(keyframe, VIDEO_CODEC_AVC));
    buf.put_u8(packet_type as u8);
    buf.put_slice(&[0, 0, 0]);
}

/// Check whether data starts with an Annex-B start code
pub fn is_annexb(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Find the next start code at or after `from`, returning its (start, end)
///
/// Zero bytes directly before a 3-byte start code are folded into it.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let mut start = i;
            while start > from && data[start - 1] == 0 {
                start -= 1;
            }
            return Some((start, i + 3));
        }
        i += 1;
    }
    None
}

/// Iterator over NAL units in Annex-B format
pub struct AnnexBIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AnnexBIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let offset = find_start_code(data, 0).map_or(data.len(), |(_, end)| end);
        Self { data, offset }
    }
}

impl<'a> Iterator for AnnexBIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.data.len() {
            let start = self.offset;
            let (end, next) = match find_start_code(self.data, start) {
                Some((code_start, code_end)) => (code_start, code_end),
                None => (self.data.len(), self.data.len()),
            };
            self.offset = next;
            if end > start {
                return Some(&self.data[start..end]);
            }
        }
        None
    }
}

/// Check whether data is a chain of big-endian length-prefixed NAL units
///
/// Every length must be non-zero and the chain must end exactly at the end
/// of the data.
pub fn is_length_prefixed(data: &[u8], length_size: u8) -> bool {
    let size = length_size as usize;
    if !(1..=4).contains(&size) || data.is_empty() {
        return false;
    }

    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < size {
            return false;
        }
        let len = rest[..size]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        if len == 0 || rest.len() - size < len {
            return false;
        }
        rest = &rest[size + len..];
    }
    true
}

/// Append a frame as length-prefixed NAL units
///
/// Data that already parses as a `length_size` chain is copied unchanged,
/// as is data with no start code. Annex-B data is re-framed with
/// `length_size`-byte prefixes.
pub fn write_length_prefixed(buf: &mut BytesMut, data: &[u8], length_size: u8) -> Result<()> {
    if is_length_prefixed(data, length_size) || !is_annexb(data) {
        buf.put_slice(data);
        return Ok(());
    }

    let max = (1u64 << (8 * u32::from(length_size))) - 1;
    for nalu in AnnexBIterator::new(data) {
        if nalu.len() as u64 > max {
            return Err(MediaError::NaluTooLarge {
                size: nalu.len(),
                length_size,
            }
            .into());
        }
        buf.put_uint(nalu.len() as u64, length_size as usize);
        buf.put_slice(nalu);
    }
    Ok(())
}

/// AVC decoder configuration (sequence header contents)
#[derive(Debug, Clone, PartialEq)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length size in bytes
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Build from the codec config blob handed over by an encoder
    ///
    /// Accepts either an AVCDecoderConfigurationRecord or Annex-B SPS/PPS.
    pub fn from_codec_config(data: Bytes) -> Result<Self> {
        if is_annexb(&data) {
            Self::from_annexb(&data)
        } else {
            Self::parse(data)
        }
    }

    /// Collect SPS/PPS from Annex-B data
    pub fn from_annexb(data: &[u8]) -> Result<Self> {
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for nalu in AnnexBIterator::new(data) {
            match NaluType::from_byte(nalu[0]) {
                Some(NaluType::Sps) => sps.push(Bytes::copy_from_slice(nalu)),
                Some(NaluType::Pps) => pps.push(Bytes::copy_from_slice(nalu)),
                _ => {}
            }
        }
        Self::from_parameter_sets(sps, pps)
    }

    /// Build from raw SPS/PPS NAL units
    pub fn from_parameter_sets(sps: Vec<Bytes>, pps: Vec<Bytes>) -> Result<Self> {
        let first = match sps.first() {
            Some(first) if !pps.is_empty() => first,
            _ => return Err(MediaError::MissingParameterSets.into()),
        };
        if first.len() < 4 {
            return Err(MediaError::InvalidAvcConfig.into());
        }

        Ok(AvcConfig {
            profile: first[1],
            compatibility: first[2],
            level: first[3],
            nalu_length_size: NALU_LENGTH_SIZE,
            sps,
            pps,
        })
    }

    /// Parse from AVCDecoderConfigurationRecord
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcConfig.into());
        }

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidAvcConfig.into());
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    /// Serialize to an AVCDecoderConfigurationRecord
    pub fn to_record(&self) -> Bytes {
        let sets_len: usize = self.sps.iter().chain(&self.pps).map(|s| s.len() + 2).sum();
        let mut buf = BytesMut::with_capacity(7 + sets_len);

        buf.put_u8(1);
        buf.put_u8(self.profile);
        buf.put_u8(self.compatibility);
        buf.put_u8(self.level);
        buf.put_u8(0xFC | (self.nalu_length_size.saturating_sub(1) & 0x03));
        buf.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            buf.put_u16(sps.len() as u16);
            buf.put_slice(sps);
        }
        buf.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            buf.put_u16(pps.len() as u16);
            buf.put_slice(pps);
        }
        buf.freeze()
    }

    /// Get profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            _ => "Unknown",
        }
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        sets.push(data.copy_to_bytes(len));
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F, 0xAC];
    const PPS: &[u8] = &[0x68, 0xEF, 0x38];

    fn record() -> Bytes {
        Bytes::from_static(&[
            0x01, // version
            0x64, // profile (High)
            0x00, // compatibility
            0x1F, // level 3.1
            0xFF, // nalu length size = 4
            0xE1, // 1 SPS
            0x00, 0x05, // SPS length
            0x67, 0x64, 0x00, 0x1F, 0xAC, // SPS data
            0x01, // 1 PPS
            0x00, 0x03, // PPS length
            0x68, 0xEF, 0x38, // PPS data
        ])
    }

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert!(NaluType::Sps.is_parameter_set());
    }

    #[test]
    fn test_avc_config_parse() {
        let config = AvcConfig::parse(record()).unwrap();
        assert_eq!(config.profile, 100);
        assert_eq!(config.level, 31);
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(config.sps, vec![Bytes::from_static(SPS)]);
        assert_eq!(config.pps, vec![Bytes::from_static(PPS)]);
        assert_eq!(config.profile_name(), "High");
        assert_eq!(config.to_record(), record());
    }

    #[test]
    fn test_avc_config_from_annexb() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(SPS);
        data.extend_from_slice(&[0, 0, 1]);
        data.extend_from_slice(PPS);

        let config = AvcConfig::from_codec_config(Bytes::from(data)).unwrap();
        assert_eq!(config.to_record(), record());
    }

    #[test]
    fn test_avc_config_requires_both_sets() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(SPS);
        assert!(AvcConfig::from_annexb(&data).is_err());
        assert!(AvcConfig::parse(Bytes::from_static(&[2, 0, 0, 0, 0, 0, 0])).is_err());
    }

    #[test]
    fn test_annexb_iterator() {
        let data = [0, 0, 0, 1, 0x09, 0xF0, 0, 0, 1, 0x65, 0x88, 0x00, 0, 0, 0, 1, 0x41];
        let nalus: Vec<&[u8]> = AnnexBIterator::new(&data).collect();
        assert_eq!(nalus, vec![&[0x09, 0xF0][..], &[0x65, 0x88][..], &[0x41][..]]);
    }

    #[test]
    fn test_write_length_prefixed() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB, 0, 0, 1, 0x41, 0xCC];
        let mut buf = BytesMut::new();
        write_length_prefixed(&mut buf, &data, 4).unwrap();
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 3, 0x65, 0xAA, 0xBB, 0, 0, 0, 2, 0x41, 0xCC]
        );

        let already = [0, 0, 0, 2, 0x41, 0xCC];
        let mut buf = BytesMut::new();
        write_length_prefixed(&mut buf, &already, 4).unwrap();
        assert_eq!(&buf[..], &already);
    }

    #[test]
    fn test_length_prefixed_nalu_looking_like_start_code() {
        // a 300-byte unit has the prefix 00 00 01 2C
        let mut data = vec![0, 0, 0x01, 0x2C, 0x65, 0x88];
        data.resize(4 + 300, 0x5A);
        assert!(is_annexb(&data));
        assert!(is_length_prefixed(&data, 4));

        let mut buf = BytesMut::new();
        write_length_prefixed(&mut buf, &data, 4).unwrap();
        assert_eq!(&buf[..], &data[..]);

        // two chained units, the first of a single byte
        let chained = [0, 0, 0, 1, 0x09, 0, 0, 0, 2, 0x41, 0x9A];
        let mut buf = BytesMut::new();
        write_length_prefixed(&mut buf, &chained, 4).unwrap();
        assert_eq!(&buf[..], &chained);
    }

    #[test]
    fn test_is_length_prefixed_rejects_broken_chains() {
        assert!(!is_length_prefixed(&[], 4));
        assert!(!is_length_prefixed(&[0, 0, 0, 0], 4));
        assert!(!is_length_prefixed(&[0, 0, 0, 1, 0x65, 0x88], 4));
        assert!(!is_length_prefixed(&[0, 0, 0, 3, 0x65], 4));
        assert!(is_length_prefixed(&[0, 2, 0x65, 0x88, 0, 1, 0x41], 2));
    }

    #[test]
    fn test_write_length_prefixed_short_prefix() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB, 0, 0, 1, 0x41, 0xCC];
        let mut buf = BytesMut::new();
        write_length_prefixed(&mut buf, &data, 2).unwrap();
        assert_eq!(&buf[..], &[0, 3, 0x65, 0xAA, 0xBB, 0, 2, 0x41, 0xCC]);

        let mut big = vec![0, 0, 0, 1, 0x65];
        big.resize(5 + 300, 0xAA);
        let mut buf = BytesMut::new();
        let err = write_length_prefixed(&mut buf, &big, 1).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Media(MediaError::NaluTooLarge { size: 301, length_size: 1 })
        ));
    }

    #[test]
    fn test_video_tag() {
        let mut buf = BytesMut::new();
        write_video_tag(&mut buf, true, AvcPacketType::SequenceHeader);
        write_video_tag(&mut buf, false, AvcPacketType::Nalu);
        assert_eq!(&buf[..], &[0x17, 0, 0, 0, 0, 0x27, 1, 0, 0, 0]);
        assert_eq!(video_tag_byte(true, 2), 0x12);
        assert!(is_known_video_codec(4));
        assert!(!is_known_video_codec(1));
        assert!(!is_known_video_codec(12));
        assert_eq!(AvcPacketType::from_byte(2), Some(AvcPacketType::EndOfSequence));
    }
}
