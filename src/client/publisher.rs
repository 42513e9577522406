//! RTMP stream publisher
//!
//! High-level API for pushing an encoded H.264/AAC stream to an RTMP ingest
//! server. Owns the connection, the network writer and inbound tasks, and the
//! chunk stream writer the caller feeds samples through.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, BufWriter};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::media::format::{stream_metadata, AudioFormat, Sample, VideoFormat};
use crate::protocol::handshake::{Handshake, SERVER_REPLY_SIZE};
use crate::protocol::window::{LimitType, WindowTracker};
use crate::session::{KeyValueStore, PublishSession, TimestampContinuity};
use crate::stats::{AbrFeedback, PublishStats, PublisherSnapshot};

use super::buffer::{run_network_writer, ThroughputBuffer};
use super::config::{ParsedUrl, PublisherConfig};
use super::connector;
use super::events::{EventSender, PublisherEvent};
use super::inbound::InboundReader;
use super::writer::{ChunkStreamWriter, SampleDisposition};

/// Capacity of the caller's event channel
const EVENT_CHANNEL_SIZE: usize = 64;

/// RTMP stream publisher
pub struct RtmpPublisher {
    config: PublisherConfig,
    writer: ChunkStreamWriter<Arc<ThroughputBuffer>>,
    buffer: Arc<ThroughputBuffer>,
    window: Arc<WindowTracker>,
    events: EventSender,
    writer_task: Option<JoinHandle<Result<()>>>,
    reader_task: Option<JoinHandle<()>>,
    stats: PublishStats,
    stopped: bool,
}

impl RtmpPublisher {
    /// Connect and start publishing
    ///
    /// Runs the handshake and the connect/releaseStream/createStream/publish
    /// command sequence, then sends the stream metadata. Returns the
    /// publisher and a receiver for its events.
    pub async fn start(
        config: PublisherConfig,
        store: Arc<dyn KeyValueStore>,
        audio: &AudioFormat,
        video: &VideoFormat,
    ) -> Result<(Self, mpsc::Receiver<PublisherEvent>)> {
        let url = config.validate()?;
        // fail on incomplete descriptors before touching the network
        stream_metadata(audio, video, &config.encoder)?;

        let socket = connector::connect(&url, &config).await?;
        let (read_half, write_half) = socket.into_split();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let events = EventSender::new(tx);

        let buffer = Arc::new(ThroughputBuffer::new(
            config.buffer_limit,
            config.wake_interval,
        ));
        let writer_task = tokio::spawn(run_network_writer(
            buffer.clone(),
            BufWriter::new(write_half),
            events.clone(),
        ));

        let window = Arc::new(WindowTracker::with_window(config.window_ack_size));
        let continuity = TimestampContinuity::new(store);
        let session = PublishSession::new(url.app.clone(), config.stream_key.clone());
        let writer = ChunkStreamWriter::new(buffer.clone(), session, continuity, window.clone());

        let mut publisher = Self {
            config,
            writer,
            buffer,
            window,
            events,
            writer_task: Some(writer_task),
            reader_task: None,
            stats: PublishStats::new(),
            stopped: false,
        };

        // on error the publisher is dropped here, which aborts its tasks
        publisher.open(&url, read_half, audio, video).await?;

        tracing::info!(
            app = %url.app,
            stream_key = %publisher.config.stream_key,
            "Publishing"
        );
        Ok((publisher, rx))
    }

    async fn open(
        &mut self,
        url: &ParsedUrl,
        mut read_half: OwnedReadHalf,
        audio: &AudioFormat,
        video: &VideoFormat,
    ) -> Result<()> {
        let mut handshake = Handshake::new();
        let challenge = handshake.generate_challenge()?;
        self.writer.send_handshake_greeting().await?;
        self.writer.send_handshake_challenge(&challenge).await?;

        let mut initial = BytesMut::with_capacity(SERVER_REPLY_SIZE);
        let skip = if self.config.complete_handshake {
            self.writer.flush().await?;
            let c2 = timeout(
                self.config.connect_timeout,
                read_handshake_reply(&mut handshake, &mut read_half, &mut initial),
            )
            .await
            .map_err(|_| Error::Timeout)??;
            self.writer.send_handshake_response(c2).await?;
            tracing::debug!("Handshake completed");
            0
        } else {
            SERVER_REPLY_SIZE
        };

        let reader = InboundReader::new(
            read_half,
            initial,
            skip,
            self.window.clone(),
            self.buffer.clone(),
            self.events.clone(),
        );
        self.reader_task = Some(tokio::spawn(reader.run()));
        self.events.send(PublisherEvent::Connected);

        let stream_key = self.config.stream_key.clone();

        let txn = self.writer.next_transaction_id();
        self.writer
            .send_connect(&url.app, &url.tc_url(), &self.config.flash_ver, txn)
            .await?;
        self.writer.set_chunk_size(self.config.chunk_size).await?;
        self.writer
            .send_window_ack_size(self.config.window_ack_size, LimitType::Hard)
            .await?;

        let txn = self.writer.next_transaction_id();
        self.writer.send_release_stream(&stream_key, txn).await?;
        if self.config.send_fc_publish {
            let txn = self.writer.next_transaction_id();
            self.writer.send_fc_publish(&stream_key, txn).await?;
        }
        let txn = self.writer.next_transaction_id();
        self.writer.send_create_stream(txn).await?;
        let txn = self.writer.next_transaction_id();
        self.writer.send_publish(&stream_key, txn).await?;

        let encoder = self.config.encoder.clone();
        self.writer.send_stream_metadata(audio, video, &encoder).await?;
        Ok(())
    }

    /// Store the video sequence header (AVCDecoderConfigurationRecord or
    /// Annex-B SPS/PPS)
    pub fn set_video_config(&mut self, config: Bytes) -> Result<()> {
        self.writer.set_video_config(config)
    }

    /// Store the AAC AudioSpecificConfig
    pub fn set_audio_config(&mut self, config: Bytes) -> Result<()> {
        self.writer.set_audio_config(config)
    }

    /// Send one encoded sample
    ///
    /// May wait while the send buffer is over its limit. Dropped samples are
    /// not errors; the disposition says what happened.
    pub async fn send_sample(&mut self, sample: &Sample) -> Result<SampleDisposition> {
        match self.writer.send_sample(sample).await {
            Ok(disposition) => {
                self.stats
                    .record(sample.is_audio(), sample.flags.key_frame, disposition);
                if disposition != SampleDisposition::Sent {
                    tracing::trace!(
                        audio = sample.is_audio(),
                        disposition = ?disposition,
                        "Sample not sent"
                    );
                }
                Ok(disposition)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.events.report_error(&e).await;
                }
                Err(e)
            }
        }
    }

    /// Wait until everything queued so far reached the socket
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await
    }

    pub fn is_connected(&self) -> bool {
        !self.stopped && self.writer.is_connected()
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Acknowledgement window shared with the inbound task
    pub fn window(&self) -> &Arc<WindowTracker> {
        &self.window
    }

    /// Feedback handle for an external bitrate controller
    pub fn abr(&self) -> Arc<dyn AbrFeedback> {
        self.buffer.clone()
    }

    /// Current counters
    pub fn stats(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            samples: self.stats.clone(),
            bytes_sent: self.window.bytes_sent(),
            bytes_acknowledged: self.window.bytes_acknowledged(),
            window: self.window.window(),
            buffered_bytes: self.buffer.buffered_bytes(),
            buffer_limit: self.buffer.buffer_limit(),
            ack_needed: self.window.ack_needed(),
            discard_needed: self.window.discard_needed(),
        }
    }

    /// Stop publishing and close the connection
    ///
    /// Sends the configured unpublish commands, drains the send buffer and
    /// joins the network writer. If the writer cannot be joined even after
    /// being aborted, the transport is abandoned and `ShutdownTimeout` is
    /// returned. Calling `stop` again does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let was_connected = self.buffer.is_connected();
        if was_connected {
            if let Err(e) = self.send_unpublish().await {
                tracing::warn!(error = %e, "Failed to send unpublish commands");
            }
        }

        self.buffer.stop();
        let result = self.join_writer().await;

        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        if was_connected {
            self.events.send(PublisherEvent::Disconnected);
        }

        let snapshot = self.stats();
        tracing::info!(
            video_frames = snapshot.samples.video_frames,
            audio_frames = snapshot.samples.audio_frames,
            dropped = snapshot.samples.dropped_frames(),
            bytes_sent = snapshot.bytes_sent,
            "Publisher stopped"
        );
        result
    }

    async fn send_unpublish(&mut self) -> Result<()> {
        let stream_key = self.config.stream_key.clone();
        if self.config.send_fc_publish {
            let txn = self.writer.next_transaction_id();
            self.writer.send_fc_unpublish(&stream_key, txn).await?;
        }
        if self.config.send_delete_stream {
            let txn = self.writer.next_transaction_id();
            self.writer.send_delete_stream(txn).await?;
        }
        Ok(())
    }

    async fn join_writer(&mut self) -> Result<()> {
        let Some(mut handle) = self.writer_task.take() else {
            return Ok(());
        };
        let wait = self.config.shutdown_timeout;

        match timeout(wait, &mut handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                // already reported through the event channel
                tracing::debug!(error = %e, "Network writer ended with error");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Network writer task failed");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Network writer did not drain in time, aborting");
                handle.abort();
                match timeout(wait, handle).await {
                    Ok(_) => Ok(()),
                    Err(_) => {
                        tracing::error!("Network writer could not be joined, abandoning transport");
                        Err(Error::ShutdownTimeout)
                    }
                }
            }
        }
    }
}

impl Drop for RtmpPublisher {
    fn drop(&mut self) {
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Read S0S1S2 and produce C2; leftover bytes stay in `buf`
async fn read_handshake_reply(
    handshake: &mut Handshake,
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
) -> Result<Bytes> {
    loop {
        if let Some(c2) = handshake.process_reply(buf)? {
            return Ok(c2);
        }
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
    }
}
