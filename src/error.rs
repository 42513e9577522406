//! Unified error types for rtmp-publish

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all publishing operations
#[derive(Debug)]
pub enum Error {
    /// I/O error on the transport
    Io(io::Error),
    /// RTMP protocol violation (fatal to the session)
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Codec configuration could not be parsed
    Media(MediaError),
    /// A required encoder descriptor field was absent
    MissingFormatField(&'static str),
    /// Adjusted timestamp would precede the stream start
    TimestampOutOfRange { raw_ms: i64, start_ms: i64 },
    /// Operation timed out
    Timeout,
    /// Network writer did not exit within the shutdown timeout
    ShutdownTimeout,
    /// Connection was closed
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl Error {
    /// Whether this error must tear down the session
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::TimestampOutOfRange { .. }
                | Error::Media(_)
                | Error::Protocol(ProtocolError::UnsupportedCodec { .. })
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::MissingFormatField(field) => {
                write!(f, "Missing required format field: {}", field)
            }
            Error::TimestampOutOfRange { raw_ms, start_ms } => write!(
                f,
                "Timestamp out of range: {} ms precedes stream start {} ms",
                raw_ms, start_ms
            ),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ShutdownTimeout => write!(f, "Network writer shutdown timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<MediaError> for Error {
    fn from(err: MediaError) -> Self {
        Error::Media(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    InvalidChunkSize(u32),
    InvalidWindowSize(u32),
    MessageTooLarge { size: usize, max: u32 },
    InvalidChunkStreamId(u32),
    InvalidMessageType(u8),
    InvalidChallengeLength(usize),
    UnsupportedCodec { audio: bool, codec_id: u8 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::InvalidChunkSize(size) => write!(f, "Invalid chunk size: {}", size),
            ProtocolError::InvalidWindowSize(size) => {
                write!(f, "Invalid window acknowledgement size: {}", size)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidChunkStreamId(id) => write!(f, "Invalid chunk stream ID: {}", id),
            ProtocolError::InvalidMessageType(t) => write!(f, "Invalid message type: {}", t),
            ProtocolError::InvalidChallengeLength(len) => {
                write!(f, "Invalid handshake challenge length: {}", len)
            }
            ProtocolError::UnsupportedCodec { audio: true, codec_id } => {
                write!(f, "Unsupported audio codec id: {}", codec_id)
            }
            ProtocolError::UnsupportedCodec { audio: false, codec_id } => {
                write!(f, "Unsupported video codec id: {}", codec_id)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    NestingTooDeep,
    InvalidObjectEnd,
    StringTooLong(usize),
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            AmfError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
            AmfError::StringTooLong(len) => write!(f, "AMF string too long: {} bytes", len),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Codec configuration errors
#[derive(Debug)]
pub enum MediaError {
    InvalidAvcConfig,
    MissingParameterSets,
    InvalidAacConfig,
    NaluTooLarge { size: usize, length_size: u8 },
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidAvcConfig => write!(f, "Invalid AVC decoder configuration"),
            MediaError::MissingParameterSets => write!(f, "Missing SPS or PPS"),
            MediaError::InvalidAacConfig => write!(f, "Invalid AAC audio specific config"),
            MediaError::NaluTooLarge { size, length_size } => write!(
                f,
                "NAL unit of {} bytes does not fit a {}-byte length prefix",
                size, length_size
            ),
        }
    }
}

impl std::error::Error for MediaError {}
