//! Chunk stream writer
//!
//! Turns protocol events (handshake, control, commands, metadata, samples)
//! into exact wire bytes and hands them to a [`ChunkSink`]. The writer never
//! touches the socket; it only frames and enqueues.
//!
//! Media gating: until the first video key frame arrives every sample is
//! dropped. That key frame triggers the video and audio sequence headers and
//! starts the timestamp continuity session at the frame's presentation time.
//!
//! The writer takes `&mut self` everywhere, so one message is always framed
//! completely before the next one starts.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::amf::Amf0Encoder;
use crate::error::{Error, ProtocolError, Result};
use crate::media::aac::{self, AacPacketType, AudioSpecificConfig};
use crate::media::format::{stream_metadata, AudioFormat, Sample, VideoFormat};
use crate::media::h264::{self, AvcConfig, AvcPacketType};
use crate::protocol::chunk::{validate_chunk_size, ChunkEncoder, RtmpChunk};
use crate::protocol::constants::*;
use crate::protocol::message::{Command, DataMessage, RtmpMessage};
use crate::protocol::window::{LimitType, WindowTracker};
use crate::session::{PublishSession, TimestampContinuity};

use super::buffer::ChunkSink;

/// What happened to a sample handed to [`ChunkStreamWriter::send_sample`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDisposition {
    /// Framed and queued
    Sent,
    /// Codec config travels through `set_video_config`/`set_audio_config`
    DroppedConfig,
    /// Still waiting for the first video key frame
    DroppedAwaitingKeyFrame,
    /// Presentation time precedes the stream start
    DroppedTooEarly,
    /// Nothing to send
    DroppedEmpty,
}

/// Frames RTMP messages onto a chunk sink
pub struct ChunkStreamWriter<S> {
    sink: S,
    encoder: ChunkEncoder,
    amf: Amf0Encoder,
    out: BytesMut,
    payload: BytesMut,
    window: Arc<WindowTracker>,
    session: PublishSession,
    continuity: TimestampContinuity,
    video_config: Option<Bytes>,
    audio_config: Option<Bytes>,
    nalu_length_size: u8,
    sound: SoundParams,
}

/// Rate, size and channel bits of non-AAC sound tags
#[derive(Debug, Clone, Copy)]
struct SoundParams {
    rate: u8,
    sixteen_bit: bool,
    stereo: bool,
}

impl Default for SoundParams {
    fn default() -> Self {
        Self {
            rate: aac::SOUND_RATE_44K,
            sixteen_bit: true,
            stereo: true,
        }
    }
}

impl<S: ChunkSink> ChunkStreamWriter<S> {
    pub fn new(
        sink: S,
        session: PublishSession,
        continuity: TimestampContinuity,
        window: Arc<WindowTracker>,
    ) -> Self {
        Self {
            sink,
            encoder: ChunkEncoder::new(),
            amf: Amf0Encoder::with_capacity(512),
            out: BytesMut::with_capacity(64 * 1024),
            payload: BytesMut::with_capacity(64 * 1024),
            window,
            session,
            continuity,
            video_config: None,
            audio_config: None,
            nalu_length_size: h264::NALU_LENGTH_SIZE,
            sound: SoundParams::default(),
        }
    }

    pub fn session(&self) -> &PublishSession {
        &self.session
    }

    /// Allocate the next command transaction id
    pub fn next_transaction_id(&mut self) -> u32 {
        self.session.next_transaction_id()
    }

    pub fn window(&self) -> &Arc<WindowTracker> {
        &self.window
    }

    pub fn chunk_size(&self) -> u32 {
        self.encoder.chunk_size()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// C0: the protocol version byte
    pub async fn send_handshake_greeting(&mut self) -> Result<()> {
        self.write_raw(Bytes::from_static(&[RTMP_VERSION])).await
    }

    /// C1: epoch, version word and the random challenge
    pub async fn send_handshake_challenge(&mut self, challenge: &[u8]) -> Result<()> {
        if challenge.len() != HANDSHAKE_CHALLENGE_SIZE {
            return Err(ProtocolError::InvalidChallengeLength(challenge.len()).into());
        }
        self.out.reserve(HANDSHAKE_SIZE);
        self.out.put_u32(0);
        self.out.put_u32(HANDSHAKE_CLIENT_VERSION);
        self.out.put_slice(challenge);
        let c1 = self.out.split().freeze();
        self.write_raw(c1).await
    }

    /// C2: the echo of S1
    pub async fn send_handshake_response(&mut self, echo: Bytes) -> Result<()> {
        if echo.len() != HANDSHAKE_SIZE {
            return Err(ProtocolError::InvalidChallengeLength(echo.len()).into());
        }
        self.write_raw(echo).await
    }

    /// Announce a new outgoing chunk size, then start using it
    pub async fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        validate_chunk_size(size)?;
        self.send_message(&RtmpMessage::SetChunkSize(size), 0).await?;
        self.encoder.set_chunk_size(size)?;
        tracing::debug!(chunk_size = size, "Outgoing chunk size changed");
        Ok(())
    }

    /// Resolve a window request and announce the effective window
    ///
    /// Returns the window that was sent.
    pub async fn send_window_ack_size(&mut self, size: u32, limit: LimitType) -> Result<u32> {
        if size < MIN_WINDOW_ACK_SIZE {
            return Err(ProtocolError::InvalidWindowSize(size).into());
        }
        let changed = self.window.apply_window(size, limit);
        let effective = self.window.window();
        tracing::debug!(
            requested = size,
            limit = ?limit,
            changed = changed,
            effective = effective,
            "Sending window acknowledgement size"
        );
        self.send_message(&RtmpMessage::WindowAckSize(effective), 0).await?;
        Ok(effective)
    }

    pub async fn send_acknowledgement(&mut self, sequence: u32) -> Result<()> {
        self.send_message(&RtmpMessage::Acknowledgement { sequence }, 0).await
    }

    pub async fn send_connect(
        &mut self,
        app: &str,
        tc_url: &str,
        flash_ver: &str,
        transaction_id: u32,
    ) -> Result<()> {
        let cmd = Command::connect(transaction_id, app, tc_url, flash_ver);
        self.send_command(cmd).await
    }

    pub async fn send_release_stream(&mut self, stream_key: &str, transaction_id: u32) -> Result<()> {
        self.send_command(Command::release_stream(transaction_id, stream_key)).await
    }

    pub async fn send_fc_publish(&mut self, stream_key: &str, transaction_id: u32) -> Result<()> {
        self.send_command(Command::fc_publish(transaction_id, stream_key)).await
    }

    pub async fn send_fc_unpublish(&mut self, stream_key: &str, transaction_id: u32) -> Result<()> {
        self.send_command(Command::fc_unpublish(transaction_id, stream_key)).await
    }

    pub async fn send_create_stream(&mut self, transaction_id: u32) -> Result<()> {
        self.send_command(Command::create_stream(transaction_id)).await
    }

    pub async fn send_publish(&mut self, stream_key: &str, transaction_id: u32) -> Result<()> {
        self.send_command(Command::publish(transaction_id, stream_key)).await
    }

    pub async fn send_delete_stream(&mut self, transaction_id: u32) -> Result<()> {
        let stream_id = self.session.stream_id;
        self.send_command(Command::delete_stream(transaction_id, stream_id)).await
    }

    async fn send_command(&mut self, cmd: Command) -> Result<()> {
        tracing::debug!(
            command = %cmd.name,
            transaction_id = cmd.transaction_id,
            "Sending command"
        );
        self.send_message(&RtmpMessage::Command(cmd), 0).await
    }

    /// `@setDataFrame("onMetaData", {...})`
    ///
    /// Fails without emitting anything if a required descriptor field is
    /// missing.
    pub async fn send_stream_metadata(
        &mut self,
        audio: &AudioFormat,
        video: &VideoFormat,
        encoder: &str,
    ) -> Result<()> {
        let metadata = stream_metadata(audio, video, encoder)?;
        let message = RtmpMessage::Data(DataMessage::set_data_frame(metadata));
        self.send_message(&message, 0).await?;

        self.sound = SoundParams {
            rate: audio.sample_rate.map_or(aac::SOUND_RATE_44K, aac::sound_rate_index),
            sixteen_bit: audio.sample_size == 16,
            stereo: audio.channels >= 2,
        };
        Ok(())
    }

    /// Store the video sequence header sent with the first key frame
    ///
    /// Accepts an AVCDecoderConfigurationRecord or Annex-B SPS/PPS.
    pub fn set_video_config(&mut self, config: Bytes) -> Result<()> {
        let avc = AvcConfig::from_codec_config(config)?;
        tracing::debug!(
            profile = avc.profile_name(),
            level = avc.level,
            nalu_length_size = avc.nalu_length_size,
            "Video config set"
        );
        // frames are framed with the prefix size the record announces
        self.nalu_length_size = avc.nalu_length_size;
        self.video_config = Some(avc.to_record());
        Ok(())
    }

    /// Store the AAC AudioSpecificConfig sent with the first key frame
    pub fn set_audio_config(&mut self, config: Bytes) -> Result<()> {
        let asc = AudioSpecificConfig::parse(config)?;
        tracing::debug!(
            sample_rate = asc.sampling_frequency,
            channels = asc.channel_configuration,
            "Audio config set"
        );
        self.audio_config = Some(asc.raw);
        Ok(())
    }

    /// Frame one encoded sample
    ///
    /// Per-sample drops are reported through the disposition; only protocol
    /// and transport failures are errors. A codec id FLV does not define is
    /// rejected before anything is emitted.
    pub async fn send_sample(&mut self, sample: &Sample) -> Result<SampleDisposition> {
        if sample.flags.codec_config {
            return Ok(SampleDisposition::DroppedConfig);
        }
        let known = if sample.is_audio() {
            aac::is_known_sound_format(sample.codec_id)
        } else {
            h264::is_known_video_codec(sample.codec_id)
        };
        if !known {
            return Err(ProtocolError::UnsupportedCodec {
                audio: sample.is_audio(),
                codec_id: sample.codec_id,
            }
            .into());
        }
        if sample.flags.end_of_stream {
            tracing::debug!(audio = sample.is_audio(), "End of stream flagged by encoder");
        }
        if sample.payload.is_empty() {
            return Ok(SampleDisposition::DroppedEmpty);
        }

        let raw_ms = sample.presentation_time_ms();

        if self.session.need_first_key_frame() {
            if sample.is_audio() || !sample.flags.key_frame {
                return Ok(SampleDisposition::DroppedAwaitingKeyFrame);
            }
            self.continuity.start_new_stream(raw_ms);
        }

        let timestamp = match self.continuity.adjust_timestamp(raw_ms) {
            Ok(ts) => ts,
            Err(e @ Error::TimestampOutOfRange { .. }) => {
                tracing::debug!(error = %e, audio = sample.is_audio(), "Dropping sample");
                return Ok(SampleDisposition::DroppedTooEarly);
            }
            Err(e) => return Err(e),
        };

        if self.session.need_first_key_frame() {
            self.send_sequence_headers(timestamp).await?;
            self.session.first_key_frame_sent();
            tracing::info!(timestamp = timestamp, "First key frame, media flowing");
        }

        if sample.is_audio() {
            self.write_audio_payload(sample);
            self.send_media(CSID_AUDIO, MSG_AUDIO, timestamp).await?;
        } else {
            if let Err(e) = self.write_video_payload(sample) {
                self.payload.clear();
                return Err(e);
            }
            self.send_media(CSID_VIDEO, MSG_VIDEO, timestamp).await?;
        }

        Ok(SampleDisposition::Sent)
    }

    fn write_audio_payload(&mut self, sample: &Sample) {
        if sample.codec_id == aac::SOUND_FORMAT_AAC {
            aac::write_audio_tag(&mut self.payload, AacPacketType::Raw);
        } else {
            let sound = self.sound;
            self.payload.put_u8(aac::sound_tag(
                sample.codec_id,
                sound.rate,
                sound.sixteen_bit,
                sound.stereo,
            ));
        }
        self.payload.put_slice(&sample.payload);
    }

    fn write_video_payload(&mut self, sample: &Sample) -> Result<()> {
        if sample.codec_id == h264::VIDEO_CODEC_AVC {
            h264::write_video_tag(&mut self.payload, sample.flags.key_frame, AvcPacketType::Nalu);
            h264::write_length_prefixed(&mut self.payload, &sample.payload, self.nalu_length_size)
        } else {
            self.payload
                .put_u8(h264::video_tag_byte(sample.flags.key_frame, sample.codec_id));
            self.payload.put_slice(&sample.payload);
            Ok(())
        }
    }

    async fn send_sequence_headers(&mut self, timestamp: u32) -> Result<()> {
        match self.video_config.clone() {
            Some(record) => {
                h264::write_video_tag(&mut self.payload, true, AvcPacketType::SequenceHeader);
                self.payload.put_slice(&record);
                self.send_media(CSID_VIDEO, MSG_VIDEO, timestamp).await?;
            }
            None => tracing::warn!("No video config set before the first key frame"),
        }

        match self.audio_config.clone() {
            Some(asc) => {
                aac::write_audio_tag(&mut self.payload, AacPacketType::SequenceHeader);
                self.payload.put_slice(&asc);
                self.send_media(CSID_AUDIO, MSG_AUDIO, timestamp).await?;
            }
            None => tracing::debug!("No audio config set, publishing without audio header"),
        }
        Ok(())
    }

    async fn send_media(&mut self, csid: u32, message_type: u8, timestamp: u32) -> Result<()> {
        let chunk = RtmpChunk {
            csid,
            timestamp,
            message_type,
            stream_id: self.session.stream_id,
            payload: self.payload.split().freeze(),
        };
        self.send_chunk(&chunk).await
    }

    async fn send_message(&mut self, message: &RtmpMessage, timestamp: u32) -> Result<()> {
        let (message_type, payload) = message.encode(&mut self.amf)?;
        let chunk = RtmpChunk {
            csid: message.csid(),
            timestamp,
            message_type,
            stream_id: message.stream_id(),
            payload,
        };
        self.send_chunk(&chunk).await
    }

    async fn send_chunk(&mut self, chunk: &RtmpChunk) -> Result<()> {
        self.encoder.encode(chunk, &mut self.out)?;
        let bytes = self.out.split().freeze();
        self.write_raw(bytes).await
    }

    /// Queue bytes and count them as sent
    async fn write_raw(&mut self, bytes: Bytes) -> Result<()> {
        let len = bytes.len() as u64;
        self.sink.write(bytes).await?;
        self.window.add_bytes_sent(len);
        Ok(())
    }

    /// Wait for queued bytes to reach the transport
    pub async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_connected()
    }
}
