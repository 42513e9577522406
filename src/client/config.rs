//! Publisher configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::chunk::validate_chunk_size;
use crate::protocol::constants::{DEFAULT_WINDOW_ACK_SIZE, RECOMMENDED_CHUNK_SIZE, RTMP_PORT};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// RTMP URL to publish to (rtmp://host[:port]/app)
    pub url: String,

    /// Stream key passed to releaseStream/publish
    pub stream_key: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Outgoing chunk size announced after connect
    pub chunk_size: u32,

    /// Window acknowledgement size announced after connect
    pub window_ack_size: u32,

    /// Initial cap on bytes queued for the network writer
    pub buffer_limit: usize,

    /// How often a producer blocked on a full buffer re-checks it
    pub wake_interval: Duration,

    /// How long `stop` waits for the network writer per attempt
    pub shutdown_timeout: Duration,

    /// Flash version string sent in connect
    pub flash_ver: String,

    /// Encoder name written into onMetaData
    pub encoder: String,

    /// Read S0S1S2 and answer with C2 before sending commands
    pub complete_handshake: bool,

    /// Send FCPublish/FCUnpublish around the publish
    pub send_fc_publish: bool,

    /// Send deleteStream on graceful stop
    pub send_delete_stream: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            stream_key: String::new(),
            connect_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            buffer_limit: 1024 * 1024,
            wake_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(2),
            flash_ver: "FMLE/3.0 (compatible; FMSc/1.0)".to_string(),
            encoder: concat!("rtmp-publish/", env!("CARGO_PKG_VERSION")).to_string(),
            complete_handshake: false,
            send_fc_publish: false,
            send_delete_stream: true,
        }
    }
}

impl PublisherConfig {
    /// Create a new config with the given URL and stream key
    pub fn new(url: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_key: stream_key.into(),
            ..Default::default()
        }
    }

    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn window_ack_size(mut self, size: u32) -> Self {
        self.window_ack_size = size;
        self
    }

    pub fn buffer_limit(mut self, bytes: usize) -> Self {
        self.buffer_limit = bytes;
        self
    }

    pub fn wake_interval(mut self, interval: Duration) -> Self {
        self.wake_interval = interval;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn encoder(mut self, name: impl Into<String>) -> Self {
        self.encoder = name.into();
        self
    }

    pub fn complete_handshake(mut self, enabled: bool) -> Self {
        self.complete_handshake = enabled;
        self
    }

    pub fn send_fc_publish(mut self, enabled: bool) -> Self {
        self.send_fc_publish = enabled;
        self
    }

    pub fn send_delete_stream(mut self, enabled: bool) -> Self {
        self.send_delete_stream = enabled;
        self
    }

    /// Parse URL into components
    pub fn parse_url(&self) -> Option<ParsedUrl> {
        // rtmp://host[:port]/app
        let url = self.url.strip_prefix("rtmp://")?;

        let (host_port, app) = url.split_once('/')?;
        let (host, port) = if let Some((h, p)) = host_port.split_once(':') {
            (h.to_string(), p.parse().ok()?)
        } else {
            (host_port.to_string(), RTMP_PORT)
        };

        if host.is_empty() || app.is_empty() {
            return None;
        }

        Some(ParsedUrl {
            host,
            port,
            app: app.trim_end_matches('/').to_string(),
        })
    }

    /// Check the config before connecting
    pub fn validate(&self) -> Result<ParsedUrl> {
        let parsed = self
            .parse_url()
            .ok_or_else(|| Error::Config(format!("Invalid RTMP URL: {}", self.url)))?;
        if self.stream_key.is_empty() {
            return Err(Error::Config("Stream key is empty".into()));
        }
        validate_chunk_size(self.chunk_size)?;
        if self.window_ack_size == 0 {
            return Err(Error::Config("Window acknowledgement size must be positive".into()));
        }
        Ok(parsed)
    }
}

/// Parsed RTMP URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
}

impl ParsedUrl {
    /// `host:port` for the TCP connect
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// tcUrl sent in connect
    pub fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parsing() {
        let config = PublisherConfig::new("rtmp://localhost/live", "key");
        let parsed = config.parse_url().unwrap();
        assert_eq!(parsed.host, "localhost");
        assert_eq!(parsed.port, 1935);
        assert_eq!(parsed.app, "live");
        assert_eq!(parsed.address(), "localhost:1935");
        assert_eq!(parsed.tc_url(), "rtmp://localhost:1935/live");

        let config = PublisherConfig::new("rtmp://example.com:1936/app/", "key");
        let parsed = config.parse_url().unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 1936);
        assert_eq!(parsed.app, "app");
    }

    #[test]
    fn test_invalid_urls() {
        assert!(PublisherConfig::new("http://host/app", "k").parse_url().is_none());
        assert!(PublisherConfig::new("rtmp://host", "k").parse_url().is_none());
        assert!(PublisherConfig::new("rtmp://host:x/app", "k").parse_url().is_none());
        assert!(PublisherConfig::new("rtmp:///app", "k").parse_url().is_none());
    }

    #[test]
    fn test_validate() {
        assert!(PublisherConfig::new("rtmp://host/app", "abc").validate().is_ok());
        assert!(matches!(
            PublisherConfig::new("rtmp://host/app", "").validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PublisherConfig::new("rtmp://host/app", "abc").chunk_size(64).validate(),
            Err(Error::Protocol(_))
        ));
        assert!(PublisherConfig::new("rtmp://host/app", "abc")
            .window_ack_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_defaults() {
        let config = PublisherConfig::default();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.window_ack_size, 2_500_000);
        assert!(!config.complete_handshake);
        assert!(!config.send_fc_publish);
    }
}
