//! TCP connection setup

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

use super::config::{ParsedUrl, PublisherConfig};

/// Open the TCP connection to the ingest server
pub async fn connect(url: &ParsedUrl, config: &PublisherConfig) -> Result<TcpStream> {
    let addr = url.address();
    tracing::debug!(addr = %addr, "Connecting to RTMP server");

    let socket = timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(Error::Io)?;

    if config.tcp_nodelay {
        socket.set_nodelay(true)?;
    }

    tracing::info!(addr = %addr, "Connected to RTMP server");
    Ok(socket)
}
