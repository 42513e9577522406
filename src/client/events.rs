//! Publisher events
//!
//! Events are delivered over a channel owned by the caller, never by calling
//! into caller code from the network tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;

/// Events from the RTMP publisher
#[derive(Debug)]
pub enum PublisherEvent {
    /// TCP connection established and handshake sent
    Connected,

    /// Server answered a command (`_result`, `_error`, `onStatus`)
    Status {
        command: String,
        code: Option<String>,
    },

    /// Server changed our acknowledgement window
    WindowChanged(u32),

    /// Fatal error; sent at most once per publisher
    Error(String),

    /// Transport closed
    Disconnected,
}

/// Sending half shared by the publisher tasks
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<PublisherEvent>,
    error_reported: Arc<AtomicBool>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<PublisherEvent>) -> Self {
        Self {
            tx,
            error_reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send an informational event, dropping it if the receiver lags
    pub fn send(&self, event: PublisherEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!(error = %e, "Dropping publisher event");
        }
    }

    /// Report a fatal error unless one was already reported
    ///
    /// Returns true if this call delivered the report.
    pub async fn report_error(&self, error: &Error) -> bool {
        if self.error_reported.swap(true, Ordering::AcqRel) {
            tracing::debug!(error = %error, "Suppressing repeated error report");
            return false;
        }
        tracing::error!(error = %error, "Publisher failed");
        let _ = self.tx.send(PublisherEvent::Error(error.to_string())).await;
        true
    }

    pub fn error_reported(&self) -> bool {
        self.error_reported.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_reported_once() {
        let (tx, mut rx) = mpsc::channel(8);
        let events = EventSender::new(tx);
        let other = events.clone();

        assert!(events.report_error(&Error::ConnectionClosed).await);
        assert!(!other.report_error(&Error::Timeout).await);
        assert!(other.error_reported());

        match rx.recv().await {
            Some(PublisherEvent::Error(msg)) => assert!(msg.contains("closed")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_does_not_block_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let events = EventSender::new(tx);
        events.send(PublisherEvent::Connected);
        events.send(PublisherEvent::Disconnected);

        assert!(matches!(rx.recv().await, Some(PublisherEvent::Connected)));
        assert!(rx.try_recv().is_err());
    }
}
