//! Encoder-supplied track descriptors and samples
//!
//! The capture pipeline describes each track once and then pushes samples.
//! Descriptor fields are optional because encoders fill them in lazily; the
//! publisher refuses to start when a field needed for `onMetaData` is absent.

use bytes::Bytes;

use crate::amf::{AmfObject, AmfValue};
use crate::error::{Error, Result};
use crate::media::aac::SOUND_FORMAT_AAC;
use crate::media::h264::VIDEO_CODEC_AVC;

/// Video track descriptor
#[derive(Debug, Clone)]
pub struct VideoFormat {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bits per second
    pub bitrate: Option<u32>,
    pub frame_rate: Option<f64>,
    pub codec_id: u8,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            bitrate: None,
            frame_rate: None,
            codec_id: VIDEO_CODEC_AVC,
        }
    }
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, bitrate: u32, frame_rate: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            bitrate: Some(bitrate),
            frame_rate: Some(frame_rate),
            ..Default::default()
        }
    }
}

/// Audio track descriptor
#[derive(Debug, Clone)]
pub struct AudioFormat {
    pub sample_rate: Option<u32>,
    pub channels: u8,
    /// Bits per second
    pub bitrate: Option<u32>,
    pub sample_size: u8,
    pub codec_id: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: None,
            channels: 2,
            bitrate: None,
            sample_size: 16,
            codec_id: SOUND_FORMAT_AAC,
        }
    }
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u8, bitrate: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channels,
            bitrate: Some(bitrate),
            ..Default::default()
        }
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(Error::MissingFormatField(field))
}

/// Build the `onMetaData` ECMA array
///
/// Property order is fixed; some ingest servers read it positionally.
pub fn stream_metadata(audio: &AudioFormat, video: &VideoFormat, encoder: &str) -> Result<AmfValue> {
    let width = required(video.width, "width")?;
    let height = required(video.height, "height")?;
    let video_bitrate = required(video.bitrate, "videodatarate")?;
    let frame_rate = required(video.frame_rate, "framerate")?;
    let sample_rate = required(audio.sample_rate, "audiosamplerate")?;
    let audio_bitrate = required(audio.bitrate, "audiodatarate")?;

    let mut props = AmfObject::with_capacity(13);
    props.insert("duration".into(), AmfValue::Number(0.0));
    props.insert("width".into(), width.into());
    props.insert("height".into(), height.into());
    props.insert("videodatarate".into(), AmfValue::Number(video_bitrate as f64 / 1000.0));
    props.insert("framerate".into(), frame_rate.into());
    props.insert("videocodecid".into(), AmfValue::Number(video.codec_id as f64));
    props.insert("audiodatarate".into(), AmfValue::Number(audio_bitrate as f64 / 1000.0));
    props.insert("audiosamplerate".into(), sample_rate.into());
    props.insert("audiosamplesize".into(), AmfValue::Number(audio.sample_size as f64));
    props.insert("stereo".into(), AmfValue::Boolean(audio.channels == 2));
    props.insert("audiocodecid".into(), AmfValue::Number(audio.codec_id as f64));
    props.insert("encoder".into(), encoder.into());
    props.insert("filesize".into(), AmfValue::Number(0.0));

    Ok(AmfValue::EcmaArray(props))
}

/// Elementary stream a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Audio,
    Video,
}

/// Per-sample flags from the encoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub key_frame: bool,
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags {
        key_frame: false,
        codec_config: false,
        end_of_stream: false,
    };

    pub const KEY_FRAME: SampleFlags = SampleFlags {
        key_frame: true,
        codec_config: false,
        end_of_stream: false,
    };

    pub const CODEC_CONFIG: SampleFlags = SampleFlags {
        key_frame: false,
        codec_config: true,
        end_of_stream: false,
    };
}

/// One encoded access unit
#[derive(Debug, Clone)]
pub struct Sample {
    pub track: Track,
    pub codec_id: u8,
    pub payload: Bytes,
    pub flags: SampleFlags,
    pub presentation_time_us: i64,
}

impl Sample {
    pub fn audio(payload: Bytes, presentation_time_us: i64) -> Self {
        Self {
            track: Track::Audio,
            codec_id: SOUND_FORMAT_AAC,
            payload,
            flags: SampleFlags::NONE,
            presentation_time_us,
        }
    }

    pub fn video(payload: Bytes, key_frame: bool, presentation_time_us: i64) -> Self {
        Self {
            track: Track::Video,
            codec_id: VIDEO_CODEC_AVC,
            payload,
            flags: if key_frame {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::NONE
            },
            presentation_time_us,
        }
    }

    pub fn with_flags(mut self, flags: SampleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_audio(&self) -> bool {
        self.track == Track::Audio
    }

    pub fn presentation_time_ms(&self) -> i64 {
        self.presentation_time_us / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_property_order() {
        let audio = AudioFormat::new(44100, 2, 128_000);
        let video = VideoFormat::new(1280, 720, 2_500_000, 30.0);
        let metadata = stream_metadata(&audio, &video, "rtmp-publish").unwrap();

        let AmfValue::EcmaArray(props) = &metadata else {
            panic!("Expected ECMA array");
        };
        let keys: Vec<&str> = props.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "duration",
                "width",
                "height",
                "videodatarate",
                "framerate",
                "videocodecid",
                "audiodatarate",
                "audiosamplerate",
                "audiosamplesize",
                "stereo",
                "audiocodecid",
                "encoder",
                "filesize",
            ]
        );
        assert_eq!(metadata.get_number("videodatarate"), Some(2500.0));
        assert_eq!(metadata.get_number("audiodatarate"), Some(128.0));
        assert_eq!(metadata.get_number("videocodecid"), Some(7.0));
        assert_eq!(metadata.get_number("audiocodecid"), Some(10.0));
        assert_eq!(metadata.get("stereo"), Some(&AmfValue::Boolean(true)));
        assert_eq!(metadata.get_string("encoder"), Some("rtmp-publish"));
    }

    #[test]
    fn test_metadata_missing_fields() {
        let audio = AudioFormat::new(44100, 2, 128_000);
        let video = VideoFormat {
            height: None,
            ..VideoFormat::new(1280, 720, 2_500_000, 30.0)
        };
        let err = stream_metadata(&audio, &video, "x").unwrap_err();
        assert!(matches!(err, Error::MissingFormatField("height")));

        let video = VideoFormat::new(1280, 720, 2_500_000, 30.0);
        let audio = AudioFormat::default();
        let err = stream_metadata(&audio, &video, "x").unwrap_err();
        assert!(matches!(err, Error::MissingFormatField("audiosamplerate")));

        let audio = AudioFormat {
            bitrate: None,
            ..AudioFormat::new(48000, 1, 64_000)
        };
        let err = stream_metadata(&audio, &video, "x").unwrap_err();
        assert!(matches!(err, Error::MissingFormatField("audiodatarate")));
    }

    #[test]
    fn test_sample_constructors() {
        let sample = Sample::video(Bytes::from_static(&[1]), true, 1_500_999);
        assert!(sample.flags.key_frame);
        assert!(!sample.is_audio());
        assert_eq!(sample.presentation_time_ms(), 1500);

        let sample = Sample::audio(Bytes::new(), 0).with_flags(SampleFlags::CODEC_CONFIG);
        assert!(sample.is_audio());
        assert!(sample.flags.codec_config);
    }
}
