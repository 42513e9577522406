//! Throughput-coupled send buffering
//!
//! Framed bytes go into a bounded FIFO; a single network-writer task drains it
//! into the socket. Producers block while the queued byte count exceeds the
//! limit, which couples the encoder to what the network actually carries. The
//! byte counters double as the throughput signal for bitrate adaptation.
//!
//! ```text
//! ChunkStreamWriter --write--> ThroughputBuffer --pop--> network writer --> socket
//!                                    ^
//!                     AbrFeedback ---+ (poll counters, set limit)
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

use crate::client::events::EventSender;
use crate::error::{Error, Result};

/// Destination for framed chunk bytes
#[async_trait]
pub trait ChunkSink: Send {
    /// Queue bytes for the transport, in order
    async fn write(&mut self, data: Bytes) -> Result<()>;

    /// Wait until everything queued so far reached the transport
    async fn flush(&mut self) -> Result<()>;

    /// Whether the transport is still usable
    fn is_connected(&self) -> bool {
        true
    }
}

/// Counters accumulated since the previous poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThroughputSample {
    /// Bytes accepted from producers
    pub bytes_enqueued: u64,
    /// Bytes written to the socket
    pub bytes_written: u64,
    /// Bytes currently queued
    pub buffered_bytes: usize,
    /// Time covered by this sample
    pub elapsed: Duration,
}

impl ThroughputSample {
    /// Socket throughput over the sample, in bits per second
    pub fn write_bitrate(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_written as f64 * 8.0 / secs) as u64
        } else {
            0
        }
    }
}

#[derive(Debug)]
struct BufferState {
    queue: VecDeque<Bytes>,
    buffered: usize,
    limit: usize,
    enqueued_since_poll: u64,
    written_since_poll: u64,
    last_poll: Instant,
}

/// Bounded byte FIFO between the producer and the network writer
#[derive(Debug)]
pub struct ThroughputBuffer {
    state: Mutex<BufferState>,
    /// Wakes the network writer
    data_ready: Notify,
    /// Wakes producers waiting for space or drain
    space_ready: Notify,
    wake_interval: Duration,
    connected: AtomicBool,
    stopping: AtomicBool,
}

impl ThroughputBuffer {
    pub fn new(limit: usize, wake_interval: Duration) -> Self {
        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::new(),
                buffered: 0,
                limit,
                enqueued_since_poll: 0,
                written_since_poll: 0,
                last_poll: Instant::now(),
            }),
            data_ready: Notify::new(),
            space_ready: Notify::new(),
            wake_interval,
            connected: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue bytes, waiting while the buffer is over its limit
    pub async fn write(&self, data: Bytes) -> Result<()> {
        loop {
            if !self.is_connected() || self.is_stopping() {
                return Err(Error::ConnectionClosed);
            }

            {
                let mut state = self.lock();
                if state.buffered <= state.limit {
                    state.buffered += data.len();
                    state.enqueued_since_poll += data.len() as u64;
                    state.queue.push_back(data);
                    drop(state);
                    self.data_ready.notify_one();
                    return Ok(());
                }
            }

            let _ = timeout(self.wake_interval, self.space_ready.notified()).await;
        }
    }

    /// Wait until the queue has been fully written
    pub async fn flush(&self) -> Result<()> {
        loop {
            if !self.is_connected() {
                return Err(Error::ConnectionClosed);
            }
            if self.lock().buffered == 0 {
                return Ok(());
            }
            let _ = timeout(self.wake_interval, self.space_ready.notified()).await;
        }
    }

    /// Change the cap; blocked producers re-check immediately
    pub fn set_buffer_limit(&self, limit: usize) {
        self.lock().limit = limit;
        self.space_ready.notify_waiters();
        tracing::debug!(limit = limit, "Buffer limit changed");
    }

    pub fn buffer_limit(&self) -> usize {
        self.lock().limit
    }

    pub fn buffered_bytes(&self) -> usize {
        self.lock().buffered
    }

    /// Take the counters accumulated since the previous poll
    pub fn poll_stats(&self) -> ThroughputSample {
        let mut state = self.lock();
        let now = Instant::now();
        let sample = ThroughputSample {
            bytes_enqueued: state.enqueued_since_poll,
            bytes_written: state.written_since_poll,
            buffered_bytes: state.buffered,
            elapsed: now.duration_since(state.last_poll),
        };
        state.enqueued_since_poll = 0;
        state.written_since_poll = 0;
        state.last_poll = now;
        sample
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether `stop` has been requested
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Ask the network writer to drain and exit
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.data_ready.notify_one();
        self.space_ready.notify_waiters();
    }

    /// Mark the transport dead and release everyone waiting on it
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.data_ready.notify_one();
        self.space_ready.notify_waiters();
    }

    pub(crate) fn pop(&self) -> Option<Bytes> {
        self.lock().queue.pop_front()
    }

    fn complete(&self, written: usize) {
        {
            let mut state = self.lock();
            state.buffered = state.buffered.saturating_sub(written);
            state.written_since_poll += written as u64;
        }
        self.space_ready.notify_waiters();
    }
}

/// Drain the buffer into the transport until stopped or failed
///
/// Writes happen strictly in queue order. The transport is flushed whenever
/// the queue runs empty. On stop, everything already queued is written before
/// returning. An I/O failure marks the buffer disconnected and is reported
/// once through `events`.
pub async fn run_network_writer<W>(
    buffer: Arc<ThroughputBuffer>,
    mut io: W,
    events: EventSender,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let result = drain(&buffer, &mut io).await;

    match &result {
        Ok(()) => {
            tracing::debug!("Network writer drained and exiting");
            let _ = io.shutdown().await;
        }
        Err(e) => {
            buffer.mark_disconnected();
            events.report_error(e).await;
        }
    }
    result
}

async fn drain<W>(buffer: &ThroughputBuffer, io: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        match buffer.pop() {
            Some(data) => {
                io.write_all(&data).await?;
                buffer.complete(data.len());
            }
            None => {
                io.flush().await?;
                if buffer.is_stopping() {
                    return Ok(());
                }
                if !buffer.is_connected() {
                    return Err(Error::ConnectionClosed);
                }
                let _ = timeout(buffer.wake_interval, buffer.data_ready.notified()).await;
            }
        }
    }
}

#[async_trait]
impl ChunkSink for Arc<ThroughputBuffer> {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        ThroughputBuffer::write(self, data).await
    }

    async fn flush(&mut self) -> Result<()> {
        ThroughputBuffer::flush(self).await
    }

    fn is_connected(&self) -> bool {
        ThroughputBuffer::is_connected(self)
    }
}

#[cfg(test)]
mod tests {
    // ChunkSink stays out of scope: its `&mut self` methods would shadow the
    // inherent ones on `Arc<ThroughputBuffer>`
    use super::{run_network_writer, ThroughputBuffer};
    use crate::client::events::{EventSender, PublisherEvent};
    use crate::error::Error;
    use bytes::Bytes;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, AsyncWrite};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn events() -> (EventSender, mpsc::Receiver<PublisherEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (EventSender::new(tx), rx)
    }

    #[tokio::test]
    async fn test_writer_preserves_order_and_drains_on_stop() {
        let buffer = Arc::new(ThroughputBuffer::new(1024, Duration::from_millis(5)));
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let (events, _rx) = events();

        let writer = tokio::spawn(run_network_writer(buffer.clone(), client, events));

        buffer.write(Bytes::from_static(b"one ")).await.unwrap();
        buffer.write(Bytes::from_static(b"two ")).await.unwrap();
        buffer.write(Bytes::from_static(b"three")).await.unwrap();
        buffer.stop();
        writer.await.unwrap().unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"one two three");
        assert_eq!(buffer.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn test_write_blocks_over_limit_until_drained() {
        let buffer = Arc::new(ThroughputBuffer::new(4, Duration::from_millis(5)));
        buffer.write(Bytes::from_static(b"12345")).await.unwrap();
        assert_eq!(buffer.buffered_bytes(), 5);

        // over the limit now: the next write must wait
        let blocked = timeout(
            Duration::from_millis(30),
            buffer.write(Bytes::from_static(b"6")),
        )
        .await;
        assert!(blocked.is_err());

        let (client, mut server) = tokio::io::duplex(1024);
        let (events, _rx) = events();
        let writer = tokio::spawn(run_network_writer(buffer.clone(), client, events));

        buffer.write(Bytes::from_static(b"6")).await.unwrap();
        buffer.flush().await.unwrap();
        buffer.stop();
        writer.await.unwrap().unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"123456");
    }

    #[tokio::test]
    async fn test_raising_limit_releases_producer() {
        let buffer = Arc::new(ThroughputBuffer::new(0, Duration::from_secs(60)));
        buffer.write(Bytes::from_static(b"a")).await.unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.write(Bytes::from_static(b"b")).await })
        };
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        buffer.set_buffer_limit(10);
        timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(buffer.buffered_bytes(), 2);
        assert_eq!(buffer.buffer_limit(), 10);
    }

    #[tokio::test]
    async fn test_poll_stats_resets_deltas() {
        let buffer = Arc::new(ThroughputBuffer::new(1024, Duration::from_millis(5)));
        let (client, mut server) = tokio::io::duplex(1024);
        let (events, _rx) = events();
        let writer = tokio::spawn(run_network_writer(buffer.clone(), client, events));

        buffer.write(Bytes::from(vec![0u8; 100])).await.unwrap();
        buffer.write(Bytes::from(vec![0u8; 50])).await.unwrap();
        buffer.flush().await.unwrap();

        let sample = buffer.poll_stats();
        assert_eq!(sample.bytes_enqueued, 150);
        assert_eq!(sample.bytes_written, 150);
        assert_eq!(sample.buffered_bytes, 0);

        let sample = buffer.poll_stats();
        assert_eq!(sample.bytes_enqueued, 0);
        assert_eq!(sample.bytes_written, 0);

        buffer.stop();
        writer.await.unwrap().unwrap();
        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 150);
    }

    #[tokio::test]
    async fn test_fast_producer_slow_consumer() {
        const LIMIT: usize = 4096;
        let buffer = Arc::new(ThroughputBuffer::new(LIMIT, Duration::from_millis(1)));
        let (client, mut server) = tokio::io::duplex(256);
        let (events, _rx) = events();
        let writer = tokio::spawn(run_network_writer(buffer.clone(), client, events));

        let consumer = tokio::spawn(async move {
            let mut received = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = server.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break received;
                }
                received.extend_from_slice(&chunk[..n]);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let mut sent = Vec::new();
        let mut max_write = 0;
        let mut peak = 0;
        for i in 0..150usize {
            let len = (i * 37) % 700 + 1;
            let data: Vec<u8> = (0..len).map(|j| (i + j) as u8).collect();
            sent.extend_from_slice(&data);
            max_write = max_write.max(len);

            buffer.write(Bytes::from(data)).await.unwrap();
            let buffered = buffer.buffered_bytes();
            assert!(buffered <= LIMIT + max_write, "buffered {}", buffered);
            peak = peak.max(buffered);
        }
        // the consumer could not keep up, so the producer had to wait
        assert!(peak > LIMIT);

        buffer.stop();
        writer.await.unwrap().unwrap();
        let received = consumer.await.unwrap();
        assert_eq!(received.len(), sent.len());
        assert_eq!(received, sent);
        assert_eq!(buffer.buffered_bytes(), 0);
    }

    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_io_failure_disconnects_and_reports_once() {
        let buffer = Arc::new(ThroughputBuffer::new(0, Duration::from_millis(5)));
        let (events, mut rx) = events();

        buffer.write(Bytes::from_static(b"x")).await.unwrap();
        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.write(Bytes::from_static(b"y")).await })
        };

        let result = run_network_writer(buffer.clone(), FailingWriter, events).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!buffer.is_connected());

        let blocked = producer.await.unwrap();
        assert!(matches!(blocked, Err(Error::ConnectionClosed)));
        assert!(buffer.write(Bytes::from_static(b"z")).await.is_err());
        assert!(buffer.flush().await.is_err());

        assert!(matches!(rx.recv().await, Some(PublisherEvent::Error(_))));
        assert!(rx.try_recv().is_err());
    }
}
