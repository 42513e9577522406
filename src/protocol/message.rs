//! RTMP message types and parsing
//!
//! RTMP messages are classified into:
//! - Protocol Control Messages (types 1-6): Chunk/flow control
//! - Command Messages (type 20): AMF0-encoded commands
//! - Data Messages (type 18): Metadata
//! - Audio/Video Messages (types 8, 9): Media data
//!
//! The publisher builds outgoing messages here and parses the small set of
//! messages a server sends back to a publishing client.
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfObject, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::RtmpChunk;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4), kept raw
    UserControl { event_type: u16, data: Bytes },

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit_type: u8 },

    /// Audio data (type 8)
    Audio { timestamp: u32, data: Bytes },

    /// Video data (type 9)
    Video { timestamp: u32, data: Bytes },

    /// AMF0 Command (type 20)
    Command(Command),

    /// AMF0 Data message (type 18) - metadata, etc.
    Data(DataMessage),

    /// Unknown message type
    Unknown { type_id: u8, data: Bytes },
}

/// RTMP command (connect, publish, _result, onStatus, etc.)
#[derive(Debug, Clone)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID
    pub transaction_id: f64,
    /// Command object (often null)
    pub command_object: AmfValue,
    /// Additional arguments
    pub arguments: Vec<AmfValue>,
    /// Message stream ID (from chunk)
    pub stream_id: u32,
}

/// Data message (@setDataFrame, onMetaData, etc.)
#[derive(Debug, Clone)]
pub struct DataMessage {
    /// Handler name (e.g., "@setDataFrame")
    pub name: String,
    /// Data values
    pub values: Vec<AmfValue>,
    /// Message stream ID
    pub stream_id: u32,
}

impl RtmpMessage {
    /// Parse a message from a chunk
    pub fn from_chunk(chunk: &RtmpChunk) -> Result<Self> {
        let mut payload = chunk.payload.clone();

        match chunk.message_type {
            MSG_SET_CHUNK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32() & 0x7FFFFFFF; // Ignore MSB
                Ok(RtmpMessage::SetChunkSize(size))
            }

            MSG_ABORT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Abort { csid: payload.get_u32() })
            }

            MSG_ACKNOWLEDGEMENT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Acknowledgement { sequence: payload.get_u32() })
            }

            MSG_USER_CONTROL => {
                if payload.len() < 2 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let event_type = payload.get_u16();
                Ok(RtmpMessage::UserControl { event_type, data: payload })
            }

            MSG_WINDOW_ACK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::WindowAckSize(payload.get_u32()))
            }

            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }

            MSG_AUDIO => Ok(RtmpMessage::Audio {
                timestamp: chunk.timestamp,
                data: payload,
            }),

            MSG_VIDEO => Ok(RtmpMessage::Video {
                timestamp: chunk.timestamp,
                data: payload,
            }),

            MSG_COMMAND_AMF0 => {
                let cmd = Self::parse_command(&mut payload, chunk.stream_id)?;
                Ok(RtmpMessage::Command(cmd))
            }

            MSG_DATA_AMF0 => {
                let data = Self::parse_data(&mut payload, chunk.stream_id)?;
                Ok(RtmpMessage::Data(data))
            }

            _ => Ok(RtmpMessage::Unknown {
                type_id: chunk.message_type,
                data: payload,
            }),
        }
    }

    /// Parse AMF0 command
    fn parse_command(payload: &mut Bytes, stream_id: u32) -> Result<Command> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => return Err(AmfError::UnknownMarker(0).into()),
        };

        let transaction_id = match decoder.decode(payload)? {
            AmfValue::Number(n) => n,
            _ => 0.0,
        };

        let command_object = if payload.has_remaining() {
            decoder.decode(payload)?
        } else {
            AmfValue::Null
        };

        let arguments = decoder.decode_all(payload)?;

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments,
            stream_id,
        })
    }

    /// Parse AMF0 data message
    fn parse_data(payload: &mut Bytes, stream_id: u32) -> Result<DataMessage> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => String::new(),
        };
        let values = decoder.decode_all(payload)?;

        Ok(DataMessage { name, values, stream_id })
    }

    /// Encode message to chunk payload, reusing the given AMF encoder
    pub fn encode(&self, amf: &mut Amf0Encoder) -> Result<(u8, Bytes)> {
        let encoded = match self {
            RtmpMessage::SetChunkSize(size) => (MSG_SET_CHUNK_SIZE, u32_payload(*size)),
            RtmpMessage::Abort { csid } => (MSG_ABORT, u32_payload(*csid)),
            RtmpMessage::Acknowledgement { sequence } => {
                (MSG_ACKNOWLEDGEMENT, u32_payload(*sequence))
            }
            RtmpMessage::WindowAckSize(size) => (MSG_WINDOW_ACK_SIZE, u32_payload(*size)),
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }
            RtmpMessage::UserControl { event_type, data } => {
                let mut buf = BytesMut::with_capacity(2 + data.len());
                buf.put_u16(*event_type);
                buf.put_slice(data);
                (MSG_USER_CONTROL, buf.freeze())
            }
            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),
            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),
            RtmpMessage::Command(cmd) => (MSG_COMMAND_AMF0, cmd.encode(amf)?),
            RtmpMessage::Data(data) => (MSG_DATA_AMF0, data.encode(amf)?),
            RtmpMessage::Unknown { type_id, data } => (*type_id, data.clone()),
        };
        Ok(encoded)
    }

    /// Chunk stream this message travels on when sent by the publisher
    pub fn csid(&self) -> u32 {
        match self {
            RtmpMessage::SetChunkSize(_)
            | RtmpMessage::Abort { .. }
            | RtmpMessage::Acknowledgement { .. }
            | RtmpMessage::UserControl { .. }
            | RtmpMessage::WindowAckSize(_)
            | RtmpMessage::SetPeerBandwidth { .. } => CSID_PROTOCOL_CONTROL,
            RtmpMessage::Audio { .. } => CSID_AUDIO,
            RtmpMessage::Video { .. } => CSID_VIDEO,
            _ => CSID_COMMAND,
        }
    }

    /// Message stream this message belongs to
    pub fn stream_id(&self) -> u32 {
        match self {
            RtmpMessage::Command(cmd) => cmd.stream_id,
            RtmpMessage::Data(data) => data.stream_id,
            RtmpMessage::Audio { .. } | RtmpMessage::Video { .. } => STREAM_ID_PUBLISH,
            _ => STREAM_ID_CONTROL,
        }
    }
}

fn u32_payload(value: u32) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

impl Command {
    /// Encode the command to AMF0 bytes
    pub fn encode(&self, amf: &mut Amf0Encoder) -> std::result::Result<Bytes, AmfError> {
        amf.reset();
        amf.encode(&AmfValue::String(self.name.clone()))?;
        amf.encode(&AmfValue::Number(self.transaction_id))?;
        amf.encode(&self.command_object)?;
        amf.encode_all(&self.arguments)?;
        Ok(amf.finish())
    }

    fn new(name: &str, transaction_id: u32, arguments: Vec<AmfValue>, stream_id: u32) -> Self {
        Command {
            name: name.to_string(),
            transaction_id: transaction_id as f64,
            command_object: AmfValue::Null,
            arguments,
            stream_id,
        }
    }

    /// `connect(txn, {app, type, flashVer, tcUrl})`
    pub fn connect(transaction_id: u32, app: &str, tc_url: &str, flash_ver: &str) -> Self {
        let mut obj = AmfObject::new();
        obj.insert("app".to_string(), AmfValue::String(app.to_string()));
        obj.insert("type".to_string(), AmfValue::String("nonprivate".into()));
        obj.insert("flashVer".to_string(), AmfValue::String(flash_ver.to_string()));
        obj.insert("tcUrl".to_string(), AmfValue::String(tc_url.to_string()));

        let mut cmd = Self::new(CMD_CONNECT, transaction_id, vec![], STREAM_ID_CONTROL);
        cmd.command_object = AmfValue::Object(obj);
        cmd
    }

    /// `releaseStream(txn, null, streamKey)`
    pub fn release_stream(transaction_id: u32, stream_key: &str) -> Self {
        Self::new(
            CMD_RELEASE_STREAM,
            transaction_id,
            vec![AmfValue::String(stream_key.to_string())],
            STREAM_ID_CONTROL,
        )
    }

    /// `FCPublish(txn, null, streamKey)`
    pub fn fc_publish(transaction_id: u32, stream_key: &str) -> Self {
        Self::new(
            CMD_FC_PUBLISH,
            transaction_id,
            vec![AmfValue::String(stream_key.to_string())],
            STREAM_ID_CONTROL,
        )
    }

    /// `FCUnpublish(txn, null, streamKey)`
    pub fn fc_unpublish(transaction_id: u32, stream_key: &str) -> Self {
        Self::new(
            CMD_FC_UNPUBLISH,
            transaction_id,
            vec![AmfValue::String(stream_key.to_string())],
            STREAM_ID_CONTROL,
        )
    }

    /// `createStream(txn, null)`
    pub fn create_stream(transaction_id: u32) -> Self {
        Self::new(CMD_CREATE_STREAM, transaction_id, vec![], STREAM_ID_CONTROL)
    }

    /// `publish(txn, null, streamKey, "live")` on the publish stream
    pub fn publish(transaction_id: u32, stream_key: &str) -> Self {
        Self::new(
            CMD_PUBLISH,
            transaction_id,
            vec![
                AmfValue::String(stream_key.to_string()),
                AmfValue::String(PUBLISH_TYPE_LIVE.to_string()),
            ],
            STREAM_ID_PUBLISH,
        )
    }

    /// `deleteStream(txn, null, streamId)`
    pub fn delete_stream(transaction_id: u32, stream_id: u32) -> Self {
        Self::new(
            CMD_DELETE_STREAM,
            transaction_id,
            vec![AmfValue::Number(stream_id as f64)],
            STREAM_ID_CONTROL,
        )
    }

    /// `code` property of an onStatus/_error info object
    pub fn status_code(&self) -> Option<&str> {
        self.arguments.first()?.get_string("code")
    }
}

impl DataMessage {
    /// Encode a data message to AMF0 bytes
    pub fn encode(&self, amf: &mut Amf0Encoder) -> std::result::Result<Bytes, AmfError> {
        amf.reset();
        amf.encode(&AmfValue::String(self.name.clone()))?;
        amf.encode_all(&self.values)?;
        Ok(amf.finish())
    }

    /// `@setDataFrame("onMetaData", metadata)` on the publish stream
    pub fn set_data_frame(metadata: AmfValue) -> Self {
        DataMessage {
            name: CMD_SET_DATA_FRAME.to_string(),
            values: vec![AmfValue::String(CMD_ON_METADATA.to_string()), metadata],
            stream_id: STREAM_ID_PUBLISH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0;

    fn parse(message: &RtmpMessage) -> RtmpMessage {
        let mut amf = Amf0Encoder::new();
        let (message_type, payload) = message.encode(&mut amf).unwrap();
        let chunk = RtmpChunk {
            csid: message.csid(),
            timestamp: 0,
            message_type,
            stream_id: message.stream_id(),
            payload,
        };
        RtmpMessage::from_chunk(&chunk).unwrap()
    }

    #[test]
    fn test_control_payloads() {
        let mut amf = Amf0Encoder::new();
        let (t, p) = RtmpMessage::SetChunkSize(4096).encode(&mut amf).unwrap();
        assert_eq!((t, &p[..]), (MSG_SET_CHUNK_SIZE, &[0, 0, 0x10, 0][..]));

        let (t, p) = RtmpMessage::WindowAckSize(2_500_000).encode(&mut amf).unwrap();
        assert_eq!(t, MSG_WINDOW_ACK_SIZE);
        assert_eq!(&p[..], &2_500_000u32.to_be_bytes());

        let (t, p) = RtmpMessage::Acknowledgement { sequence: 7 }.encode(&mut amf).unwrap();
        assert_eq!((t, &p[..]), (MSG_ACKNOWLEDGEMENT, &[0, 0, 0, 7][..]));

        assert_eq!(RtmpMessage::SetChunkSize(1).csid(), CSID_PROTOCOL_CONTROL);
    }

    #[test]
    fn test_connect_command() {
        let cmd = Command::connect(1, "live", "rtmp://host/live", "FMLE/3.0");
        let parsed = parse(&RtmpMessage::Command(cmd));
        let RtmpMessage::Command(parsed) = parsed else {
            panic!("Expected Command message");
        };
        assert_eq!(parsed.name, CMD_CONNECT);
        assert_eq!(parsed.transaction_id, 1.0);
        assert_eq!(parsed.command_object.get_string("app"), Some("live"));
        assert_eq!(parsed.command_object.get_string("tcUrl"), Some("rtmp://host/live"));
        let keys: Vec<_> = parsed.command_object.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["app", "type", "flashVer", "tcUrl"]);
    }

    #[test]
    fn test_publish_command_layout() {
        let cmd = Command::publish(5, "abc");
        assert_eq!(cmd.stream_id, STREAM_ID_PUBLISH);

        let mut amf = Amf0Encoder::new();
        let bytes = cmd.encode(&mut amf).unwrap();
        let values = amf0::decode_all(&bytes).unwrap();
        assert_eq!(
            values,
            vec![
                AmfValue::String("publish".into()),
                AmfValue::Number(5.0),
                AmfValue::Null,
                AmfValue::String("abc".into()),
                AmfValue::String("live".into()),
            ]
        );
    }

    #[test]
    fn test_release_and_create_stream() {
        let mut amf = Amf0Encoder::new();
        let bytes = Command::release_stream(2, "abc").encode(&mut amf).unwrap();
        assert_eq!(
            amf0::decode_all(&bytes).unwrap(),
            vec![
                AmfValue::String("releaseStream".into()),
                AmfValue::Number(2.0),
                AmfValue::Null,
                AmfValue::String("abc".into()),
            ]
        );

        let bytes = Command::create_stream(3).encode(&mut amf).unwrap();
        assert_eq!(
            amf0::decode_all(&bytes).unwrap(),
            vec![
                AmfValue::String("createStream".into()),
                AmfValue::Number(3.0),
                AmfValue::Null,
            ]
        );
    }

    #[test]
    fn test_set_data_frame() {
        let metadata: AmfValue = [("width", 1280u32), ("height", 720u32)].into_iter().collect();
        let message = RtmpMessage::Data(DataMessage::set_data_frame(metadata.clone()));
        let RtmpMessage::Data(parsed) = parse(&message) else {
            panic!("Expected Data message");
        };
        assert_eq!(parsed.name, CMD_SET_DATA_FRAME);
        assert_eq!(parsed.values[0].as_str(), Some(CMD_ON_METADATA));
        assert_eq!(parsed.values[1], metadata);
        assert_eq!(parsed.stream_id, STREAM_ID_PUBLISH);
    }

    #[test]
    fn test_parse_server_messages() {
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_SET_PEER_BANDWIDTH,
            stream_id: 0,
            payload: Bytes::from_static(&[0, 0x26, 0x25, 0xA0, BANDWIDTH_LIMIT_DYNAMIC]),
        };
        assert!(matches!(
            RtmpMessage::from_chunk(&chunk).unwrap(),
            RtmpMessage::SetPeerBandwidth { size: 2_500_000, limit_type: BANDWIDTH_LIMIT_DYNAMIC }
        ));

        let chunk = RtmpChunk {
            message_type: MSG_SET_CHUNK_SIZE,
            payload: Bytes::from_static(&[0x80, 0, 0x10, 0]),
            ..chunk
        };
        assert!(matches!(
            RtmpMessage::from_chunk(&chunk).unwrap(),
            RtmpMessage::SetChunkSize(4096)
        ));

        let short = RtmpChunk {
            message_type: MSG_ACKNOWLEDGEMENT,
            payload: Bytes::from_static(&[0, 1]),
            ..chunk
        };
        assert!(RtmpMessage::from_chunk(&short).is_err());
    }

    #[test]
    fn test_status_code() {
        let info: AmfValue = [
            ("level", AmfValue::from("status")),
            ("code", AmfValue::from("NetStream.Publish.Start")),
        ]
        .into_iter()
        .collect();
        let cmd = Command {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![info],
            stream_id: 1,
        };
        assert_eq!(cmd.status_code(), Some("NetStream.Publish.Start"));
        assert_eq!(Command::create_stream(1).status_code(), None);
    }
}
