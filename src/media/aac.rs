//! AAC audio packaging
//!
//! RTMP transports AAC audio in raw format (without ADTS headers).
//!
//! AAC Audio Packet Structure:
//! ```text
//! +----------+----------+----------+----------+---------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AACType | AACData
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  | (1 byte)|
//! +----------+----------+----------+----------+---------+
//! ```
//!
//! For AAC the rate/size/type bits are fixed at 44 kHz, 16-bit, stereo; the
//! real values come from the AudioSpecificConfig.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// FLV sound format for AAC
pub const SOUND_FORMAT_AAC: u8 = 10;

/// Sound rate index for 44 kHz
pub const SOUND_RATE_44K: u8 = 3;

/// Size of the audio tag written before AAC payloads
pub const AUDIO_TAG_SIZE: usize = 2;

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader = 0,
    /// Raw AAC frame data
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// Whether `format` is a sound format defined for FLV tags
///
/// 9 is reserved, 12 and 13 are unassigned.
pub fn is_known_sound_format(format: u8) -> bool {
    matches!(format, 0..=8 | 10 | 11 | 14 | 15)
}

/// Sound rate index for a sample rate (0 = 5.5 kHz .. 3 = 44 kHz)
pub fn sound_rate_index(sample_rate: u32) -> u8 {
    match sample_rate {
        0..=8_000 => 0,
        8_001..=16_000 => 1,
        16_001..=32_000 => 2,
        _ => SOUND_RATE_44K,
    }
}

/// Build the one-byte sound tag
pub fn sound_tag(format: u8, rate: u8, sixteen_bit: bool, stereo: bool) -> u8 {
    (format << 4) | ((rate & 0x03) << 2) | ((sixteen_bit as u8) << 1) | stereo as u8
}

/// Write the 2-byte AAC audio tag (0xAF + packet type)
pub fn write_audio_tag(buf: &mut BytesMut, packet_type: AacPacketType) {
    buf.put_u8(sound_tag(SOUND_FORMAT_AAC, SOUND_RATE_44K, true, true));
    buf.put_u8(packet_type as u8);
}

/// AudioSpecificConfig (sequence header contents)
#[derive(Debug, Clone)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC LC)
    pub audio_object_type: u8,
    /// Sampling frequency index
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Standard sampling frequencies by index
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// Parse from AAC sequence header data
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacConfig.into());
        }

        // audioObjectType: 5 bits, samplingFrequencyIndex: 4 bits,
        // [samplingFrequency: 24 bits], channelConfiguration: 4 bits
        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, channel_configuration) = if sampling_frequency_index == 0x0F {
            if data.len() < 5 {
                return Err(MediaError::InvalidAacConfig.into());
            }
            let f0 = (data[1] & 0x7F) as u32;
            let f1 = data[2] as u32;
            let f2 = data[3] as u32;
            let f3 = (data[4] >> 7) as u32;
            let frequency = (f0 << 17) | (f1 << 9) | (f2 << 1) | f3;
            (frequency, (data[4] >> 3) & 0x0F)
        } else {
            match Self::SAMPLING_FREQUENCIES.get(sampling_frequency_index as usize) {
                Some(frequency) => (*frequency, (b1 >> 3) & 0x0F),
                None => return Err(MediaError::InvalidAacConfig.into()),
            }
        };

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            raw: data,
        })
    }
}
