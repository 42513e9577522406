//! AMF0 encoder and decoder
//!
//! Reference: AMF0 File Format Specification (amf0-file-format-specification.pdf)
//!
//! Supported type markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x08 - ECMA Array (32-bit count + object encoding)
//! 0x09 - Object End (0x000009 sequence)
//! ```
//!
//! Every other marker is rejected. The decoder performs no recovery.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// Longest string representable with a 16-bit length prefix
const MAX_SHORT_STRING: usize = 0xFFFF;

/// Strict AMF0 decoder
pub struct Amf0Decoder {
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Reset decoder state (call between messages)
    pub fn reset(&mut self) {
        self.depth = 0;
    }

    /// Decode a single AMF0 value from the buffer
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode all values from buffer until exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => {
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_OBJECT => Ok(AmfValue::Object(self.decode_properties(buf)?)),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                // Count is a hint only; the end marker terminates the array
                let _count = buf.get_u32();
                Ok(AmfValue::EcmaArray(self.decode_properties(buf)?))
            }
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    /// Read name/value pairs until the empty-name + end-marker sequence
    fn decode_properties(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        let mut properties = AmfObject::new();

        loop {
            let key = read_utf8(buf)?;
            if key.is_empty() {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                if buf.get_u8() != MARKER_OBJECT_END {
                    return Err(AmfError::InvalidObjectEnd);
                }
                return Ok(properties);
            }

            let value = self.decode(buf)?;
            properties.insert(key, value);
        }
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read UTF-8 string with 16-bit length prefix
fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }

    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }

    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
///
/// The internal buffer is reused across messages: `finish` hands out the
/// encoded bytes and leaves the allocation in place for the next message.
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Create encoder with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Discard anything encoded since the last `finish`
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single AMF0 value
    pub fn encode(&mut self, value: &AmfValue) -> Result<(), AmfError> {
        match value {
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::String(s) => {
                self.buf.put_u8(MARKER_STRING);
                self.write_utf8(s)?;
            }
            AmfValue::Null => {
                self.buf.put_u8(MARKER_NULL);
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props)?;
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props)?;
            }
        }
        Ok(())
    }

    /// Encode multiple values
    pub fn encode_all(&mut self, values: &[AmfValue]) -> Result<(), AmfError> {
        for value in values {
            self.encode(value)?;
        }
        Ok(())
    }

    fn write_properties(&mut self, props: &AmfObject) -> Result<(), AmfError> {
        for (key, val) in props {
            self.write_utf8(key)?;
            self.encode(val)?;
        }
        // Empty name followed by the end marker
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
        Ok(())
    }

    /// Write UTF-8 string with 16-bit length prefix (no type marker)
    fn write_utf8(&mut self, s: &str) -> Result<(), AmfError> {
        if s.len() > MAX_SHORT_STRING {
            return Err(AmfError::StringTooLong(s.len()));
        }
        self.buf.put_u16(s.len() as u16);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &AmfValue) -> Result<Bytes, AmfError> {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value)?;
    Ok(encoder.finish())
}

/// Convenience function to decode a single value
pub fn decode(data: &[u8]) -> Result<AmfValue, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode(&mut buf)
}

/// Convenience function to decode all values
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: AmfValue) {
        let encoded = encode(&value).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_scalar_roundtrip() {
        roundtrip(AmfValue::Number(42.5));
        roundtrip(AmfValue::Number(-0.25));
        roundtrip(AmfValue::String("hello world".into()));
        roundtrip(AmfValue::String(String::new()));
        roundtrip(AmfValue::Boolean(true));
        roundtrip(AmfValue::Boolean(false));
        roundtrip(AmfValue::Null);
    }

    #[test]
    fn test_nested_object_roundtrip() {
        let inner: AmfValue = [("level", AmfValue::from("status")), ("ok", true.into())]
            .into_iter()
            .collect();
        let mut props = AmfObject::new();
        props.insert("name".into(), AmfValue::String("test".into()));
        props.insert("value".into(), AmfValue::Number(123.0));
        props.insert("inner".into(), inner);
        props.insert("nothing".into(), AmfValue::Null);
        roundtrip(AmfValue::Object(props));
    }

    #[test]
    fn test_ecma_array_roundtrip() {
        let mut props = AmfObject::new();
        props.insert("width".into(), AmfValue::Number(1280.0));
        props.insert("stereo".into(), AmfValue::Boolean(true));
        roundtrip(AmfValue::EcmaArray(props));
    }

    #[test]
    fn test_wire_layout() {
        let encoded = encode(&AmfValue::String("ab".into())).unwrap();
        assert_eq!(&encoded[..], &[0x02, 0x00, 0x02, b'a', b'b']);

        let encoded = encode(&AmfValue::Object(AmfObject::new())).unwrap();
        assert_eq!(&encoded[..], &[0x03, 0x00, 0x00, 0x09]);

        let encoded = encode(&AmfValue::EcmaArray(AmfObject::new())).unwrap();
        assert_eq!(&encoded[..], &[0x08, 0, 0, 0, 0, 0x00, 0x00, 0x09]);

        let encoded = encode(&AmfValue::Number(1.0)).unwrap();
        assert_eq!(encoded[0], 0x00);
        assert_eq!(&encoded[1..], &1.0f64.to_be_bytes());
    }

    #[test]
    fn test_multiple_values() {
        let values = vec![
            AmfValue::String("connect".into()),
            AmfValue::Number(1.0),
            AmfValue::Null,
        ];

        let mut encoder = Amf0Encoder::new();
        encoder.encode_all(&values).unwrap();
        let encoded = encoder.finish();
        assert!(encoder.is_empty());

        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_unknown_marker_is_error() {
        // 0x06 (undefined) and 0x0A (strict array) are outside the supported subset
        assert!(matches!(decode(&[0x06]), Err(AmfError::UnknownMarker(0x06))));
        assert!(matches!(decode(&[0x0A, 0, 0, 0, 0]), Err(AmfError::UnknownMarker(0x0A))));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(decode(&[]), Err(AmfError::UnexpectedEof)));
        assert!(matches!(decode(&[0x00, 0x3F]), Err(AmfError::UnexpectedEof)));
        assert!(matches!(decode(&[0x02, 0x00, 0x05, b'a']), Err(AmfError::UnexpectedEof)));
        // Object missing its end marker
        assert!(matches!(decode(&[0x03, 0x00, 0x00]), Err(AmfError::UnexpectedEof)));
    }

    #[test]
    fn test_bad_object_end() {
        assert!(matches!(
            decode(&[0x03, 0x00, 0x00, 0x05]),
            Err(AmfError::InvalidObjectEnd)
        ));
    }

    #[test]
    fn test_long_string_rejected() {
        let long_str = "x".repeat(70000);
        let result = encode(&AmfValue::String(long_str));
        assert!(matches!(result, Err(AmfError::StringTooLong(70000))));
    }

    #[test]
    fn test_nesting_limit() {
        let mut data = Vec::new();
        for _ in 0..(MAX_NESTING_DEPTH + 1) {
            data.extend_from_slice(&[0x03, 0x00, 0x01, b'k']);
        }
        assert!(matches!(decode(&data), Err(AmfError::NestingTooDeep)));
    }

    #[test]
    fn test_encoder_reuse() {
        let mut encoder = Amf0Encoder::with_capacity(64);
        encoder.encode(&AmfValue::Number(1.0)).unwrap();
        let first = encoder.finish();
        encoder.encode(&AmfValue::Null).unwrap();
        let second = encoder.finish();
        assert_eq!(first.len(), 9);
        assert_eq!(&second[..], &[0x05]);

        encoder.encode(&AmfValue::Null).unwrap();
        encoder.reset();
        assert!(encoder.is_empty());
    }
}
