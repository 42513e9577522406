//! Inbound reader task
//!
//! A publisher mostly writes, but the server still talks back: the handshake
//! reply, chunk size changes, acknowledgements, bandwidth limits, pings and
//! command results. This task consumes all of it so the socket's receive
//! buffer never fills, and feeds what matters into the shared state.
//!
//! Replies (acknowledgements, ping responses, window announcements) are
//! single-chunk control messages enqueued as one buffer write, so they can
//! never split a message the producer is framing.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::amf::Amf0Encoder;
use crate::error::{Error, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
use crate::protocol::constants::*;
use crate::protocol::message::RtmpMessage;
use crate::protocol::window::{LimitType, WindowTracker};

use super::buffer::ThroughputBuffer;
use super::events::{EventSender, PublisherEvent};

/// User control event: ping request from the server
const USER_CONTROL_PING_REQUEST: u16 = 6;

/// User control event: ping response to the server
const USER_CONTROL_PING_RESPONSE: u16 = 7;

/// Reads and reacts to everything the server sends
pub struct InboundReader<R> {
    reader: R,
    read_buf: BytesMut,
    skip: usize,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    amf: Amf0Encoder,
    window: Arc<WindowTracker>,
    buffer: Arc<ThroughputBuffer>,
    events: EventSender,
    bytes_received: u64,
    last_ack_sent: u64,
    peer_window: u32,
}

impl<R: AsyncRead + Unpin + Send> InboundReader<R> {
    /// `skip` bytes of handshake reply are discarded before chunk decoding;
    /// `initial` holds bytes already read from the socket.
    pub fn new(
        reader: R,
        initial: BytesMut,
        skip: usize,
        window: Arc<WindowTracker>,
        buffer: Arc<ThroughputBuffer>,
        events: EventSender,
    ) -> Self {
        let mut read_buf = BytesMut::with_capacity(16 * 1024);
        read_buf.extend_from_slice(&initial);
        Self {
            reader,
            read_buf,
            skip,
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            amf: Amf0Encoder::new(),
            window,
            buffer,
            events,
            bytes_received: initial.len() as u64,
            last_ack_sent: 0,
            peer_window: DEFAULT_WINDOW_ACK_SIZE,
        }
    }

    /// Run until the connection closes or the publisher stops
    pub async fn run(mut self) {
        match self.read_loop().await {
            Ok(()) => tracing::debug!("Inbound reader exiting"),
            Err(e) if self.buffer.is_stopping() => {
                tracing::debug!(error = %e, "Inbound reader closed during shutdown");
            }
            Err(e) => {
                if self.buffer.is_connected() {
                    self.buffer.mark_disconnected();
                    self.events.report_error(&e).await;
                }
                self.events.send(PublisherEvent::Disconnected);
            }
        }
    }

    async fn read_loop(&mut self) -> Result<()> {
        loop {
            self.process_buffer().await?;

            let n = self.reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.bytes_received += n as u64;
        }
    }

    async fn process_buffer(&mut self) -> Result<()> {
        if self.skip > 0 {
            let n = self.skip.min(self.read_buf.len());
            self.read_buf.advance(n);
            self.skip -= n;
            if self.skip > 0 {
                return Ok(());
            }
            tracing::debug!("Server handshake reply discarded");
        }

        loop {
            let chunk = match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    // cannot resync a chunk stream; keep draining the socket
                    tracing::warn!(error = %e, "Undecodable data from server, ignoring the rest");
                    self.read_buf.clear();
                    self.skip = usize::MAX;
                    return Ok(());
                }
            };
            self.handle_chunk(&chunk).await?;
        }

        self.maybe_acknowledge().await
    }

    async fn handle_chunk(&mut self, chunk: &RtmpChunk) -> Result<()> {
        let message = match RtmpMessage::from_chunk(chunk) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    message_type = chunk.message_type,
                    "Failed to parse server message"
                );
                return Ok(());
            }
        };

        match message {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size = size, "Server chunk size");
                self.decoder.set_chunk_size(size);
            }

            RtmpMessage::Abort { csid } => {
                self.decoder.abort(csid);
            }

            RtmpMessage::Acknowledgement { sequence } => {
                tracing::trace!(sequence = sequence, "Server acknowledged");
                self.window.set_bytes_acknowledged(u64::from(sequence));
                if self.window.discard_needed() {
                    tracing::debug!(
                        sent = self.window.bytes_sent(),
                        acknowledged = sequence,
                        "Server is far behind the acknowledgement window"
                    );
                }
            }

            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(size = size, "Server window acknowledgement size");
                self.peer_window = size.max(MIN_WINDOW_ACK_SIZE);
            }

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let Some(limit) = LimitType::from_u8(limit_type) else {
                    tracing::warn!(limit_type = limit_type, "Unknown peer bandwidth limit type");
                    return Ok(());
                };
                if size < MIN_WINDOW_ACK_SIZE {
                    return Ok(());
                }
                if self.window.apply_window(size, limit) {
                    let effective = self.window.window();
                    tracing::debug!(size = effective, limit = ?limit, "Peer bandwidth applied");
                    self.send_control(RtmpMessage::WindowAckSize(effective)).await?;
                    self.events.send(PublisherEvent::WindowChanged(effective));
                }
            }

            RtmpMessage::UserControl { event_type, data } => {
                if event_type == USER_CONTROL_PING_REQUEST {
                    self.send_control(RtmpMessage::UserControl {
                        event_type: USER_CONTROL_PING_RESPONSE,
                        data,
                    })
                    .await?;
                }
            }

            RtmpMessage::Command(cmd) => {
                let code = cmd.status_code().map(str::to_string);
                match cmd.name.as_str() {
                    CMD_ERROR => tracing::warn!(
                        transaction_id = cmd.transaction_id,
                        code = ?code,
                        "Server rejected command"
                    ),
                    _ => tracing::debug!(
                        command = %cmd.name,
                        transaction_id = cmd.transaction_id,
                        code = ?code,
                        "Server command"
                    ),
                }
                if matches!(cmd.name.as_str(), CMD_RESULT | CMD_ERROR | CMD_ON_STATUS) {
                    self.events.send(PublisherEvent::Status {
                        command: cmd.name,
                        code,
                    });
                }
            }

            other => {
                tracing::trace!(message = ?other, "Ignoring server message");
            }
        }
        Ok(())
    }

    /// Acknowledge received bytes once a peer window has accumulated
    async fn maybe_acknowledge(&mut self) -> Result<()> {
        if self.bytes_received - self.last_ack_sent >= u64::from(self.peer_window) {
            self.last_ack_sent = self.bytes_received;
            let sequence = self.bytes_received as u32;
            self.send_control(RtmpMessage::Acknowledgement { sequence }).await?;
        }
        Ok(())
    }

    async fn send_control(&mut self, message: RtmpMessage) -> Result<()> {
        let (message_type, payload) = message.encode(&mut self.amf)?;
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type,
            stream_id: STREAM_ID_CONTROL,
            payload,
        };
        let mut out = BytesMut::with_capacity(32);
        self.encoder.encode(&chunk, &mut out)?;
        let len = out.len() as u64;
        self.buffer.write(out.freeze()).await?;
        self.window.add_bytes_sent(len);
        Ok(())
    }
}

/// Encode server-side control messages, for tests
#[cfg(test)]
pub(crate) fn server_message(message: &RtmpMessage, csid: u32) -> bytes::Bytes {
    let mut amf = Amf0Encoder::new();
    let (message_type, payload) = message.encode(&mut amf).unwrap();
    let chunk = RtmpChunk {
        csid,
        timestamp: 0,
        message_type,
        stream_id: 0,
        payload,
    };
    let mut out = BytesMut::new();
    ChunkEncoder::new().encode(&chunk, &mut out).unwrap();
    out.freeze()
}
