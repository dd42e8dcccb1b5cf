//! AMF0 script data
//!
//! FLV script tags carry AMF0-encoded values; the only one the relay reads
//! or writes is `onMetaData`. Objects keep their property order so metadata
//! round-trips the way players expect.
//!
//! Type markers handled:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x08 - ECMA Array (associative array)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

/// Maximum nesting depth for objects/arrays
const MAX_NESTING_DEPTH: usize = 32;

/// A decoded script data value
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, ScriptValue)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, ScriptValue)>),
    StrictArray(Vec<ScriptValue>),
    /// Milliseconds since the Unix epoch
    Date(f64),
}

impl ScriptValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Properties of an object or ECMA array
    pub fn properties(&self) -> Option<&[(String, ScriptValue)]> {
        match self {
            ScriptValue::Object(props) | ScriptValue::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    /// Look up a property by name
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.properties()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Decode every value in a script tag body
///
/// Lenient about a missing object end marker at the very end of the
/// buffer, which some encoders omit.
pub fn decode_all(mut buf: Bytes) -> Result<Vec<ScriptValue>, MediaError> {
    let mut values = Vec::new();
    while buf.has_remaining() {
        values.push(decode(&mut buf, 0)?);
    }
    Ok(values)
}

fn decode(buf: &mut Bytes, depth: usize) -> Result<ScriptValue, MediaError> {
    if depth > MAX_NESTING_DEPTH || buf.is_empty() {
        return Err(MediaError::InvalidAmf);
    }

    match buf.get_u8() {
        MARKER_NUMBER => {
            need(buf, 8)?;
            Ok(ScriptValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            need(buf, 1)?;
            Ok(ScriptValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(ScriptValue::String(read_utf8(buf)?)),
        MARKER_LONG_STRING => Ok(ScriptValue::String(read_utf8_long(buf)?)),
        MARKER_OBJECT => Ok(ScriptValue::Object(decode_properties(buf, depth)?)),
        MARKER_NULL => Ok(ScriptValue::Null),
        MARKER_UNDEFINED => Ok(ScriptValue::Undefined),
        MARKER_ECMA_ARRAY => {
            need(buf, 4)?;
            // Count hint, not always accurate
            let _count = buf.get_u32();
            Ok(ScriptValue::EcmaArray(decode_properties(buf, depth)?))
        }
        MARKER_STRICT_ARRAY => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            let mut elements = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                elements.push(decode(buf, depth + 1)?);
            }
            Ok(ScriptValue::StrictArray(elements))
        }
        MARKER_DATE => {
            need(buf, 10)?;
            let timestamp = buf.get_f64();
            let _timezone = buf.get_i16();
            Ok(ScriptValue::Date(timestamp))
        }
        _ => Err(MediaError::InvalidAmf),
    }
}

fn decode_properties(
    buf: &mut Bytes,
    depth: usize,
) -> Result<Vec<(String, ScriptValue)>, MediaError> {
    let mut properties = Vec::new();

    loop {
        if buf.is_empty() {
            // Missing end marker
            break;
        }
        let key = read_utf8(buf)?;
        if key.is_empty() {
            if buf.has_remaining() && buf[0] == MARKER_OBJECT_END {
                buf.advance(1);
            }
            break;
        }
        let value = decode(buf, depth + 1)?;
        properties.push((key, value));
    }

    Ok(properties)
}

fn need(buf: &Bytes, n: usize) -> Result<(), MediaError> {
    if buf.remaining() < n {
        Err(MediaError::InvalidAmf)
    } else {
        Ok(())
    }
}

fn read_utf8(buf: &mut Bytes) -> Result<String, MediaError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| MediaError::InvalidAmf)
}

fn read_utf8_long(buf: &mut Bytes) -> Result<String, MediaError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| MediaError::InvalidAmf)
}

/// Encode values back to back
pub fn encode_all(values: &[ScriptValue]) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);
    for value in values {
        encode(&mut buf, value);
    }
    buf.freeze()
}

fn encode(buf: &mut BytesMut, value: &ScriptValue) {
    match value {
        ScriptValue::Number(n) => {
            buf.put_u8(MARKER_NUMBER);
            buf.put_f64(*n);
        }
        ScriptValue::Boolean(b) => {
            buf.put_u8(MARKER_BOOLEAN);
            buf.put_u8(u8::from(*b));
        }
        ScriptValue::String(s) => {
            if s.len() > 0xFFFF {
                buf.put_u8(MARKER_LONG_STRING);
                buf.put_u32(s.len() as u32);
            } else {
                buf.put_u8(MARKER_STRING);
                buf.put_u16(s.len() as u16);
            }
            buf.put_slice(s.as_bytes());
        }
        ScriptValue::Object(props) => {
            buf.put_u8(MARKER_OBJECT);
            encode_properties(buf, props);
        }
        ScriptValue::Null => buf.put_u8(MARKER_NULL),
        ScriptValue::Undefined => buf.put_u8(MARKER_UNDEFINED),
        ScriptValue::EcmaArray(props) => {
            buf.put_u8(MARKER_ECMA_ARRAY);
            buf.put_u32(props.len() as u32);
            encode_properties(buf, props);
        }
        ScriptValue::StrictArray(elements) => {
            buf.put_u8(MARKER_STRICT_ARRAY);
            buf.put_u32(elements.len() as u32);
            for element in elements {
                encode(buf, element);
            }
        }
        ScriptValue::Date(timestamp) => {
            buf.put_u8(MARKER_DATE);
            buf.put_f64(*timestamp);
            buf.put_i16(0);
        }
    }
}

fn encode_properties(buf: &mut BytesMut, props: &[(String, ScriptValue)]) {
    for (key, value) in props {
        let len = key.len().min(0xFFFF);
        buf.put_u16(len as u16);
        buf.put_slice(&key.as_bytes()[..len]);
        encode(buf, value);
    }
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_metadata_roundtrip() {
        let values = vec![
            ScriptValue::String("onMetaData".into()),
            ScriptValue::EcmaArray(vec![
                ("width".into(), ScriptValue::Number(1280.0)),
                ("height".into(), ScriptValue::Number(720.0)),
                ("stereo".into(), ScriptValue::Boolean(true)),
                ("encoder".into(), ScriptValue::String("obs".into())),
            ]),
        ];

        let decoded = decode_all(encode_all(&values)).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(decoded[1].get("height").and_then(ScriptValue::as_number), Some(720.0));
        assert_eq!(decoded[1].get("stereo").and_then(ScriptValue::as_bool), Some(true));
        assert!(decoded[1].get("missing").is_none());
    }

    #[test]
    fn test_missing_object_end_is_tolerated() {
        // ECMA array with one property and no 0x000009 terminator
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_ECMA_ARRAY);
        buf.put_u32(1);
        buf.put_u16(5);
        buf.put_slice(b"width");
        buf.put_u8(MARKER_NUMBER);
        buf.put_f64(640.0);

        let values = decode_all(buf.freeze()).unwrap();
        assert_eq!(values[0].get("width").and_then(ScriptValue::as_number), Some(640.0));
    }

    #[test]
    fn test_truncated_number() {
        let data = Bytes::from_static(&[MARKER_NUMBER, 0x40, 0x00]);
        assert!(matches!(decode_all(data), Err(MediaError::InvalidAmf)));
    }

    #[test]
    fn test_unknown_marker() {
        let data = Bytes::from_static(&[0x42]);
        assert!(decode_all(data).is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let mut buf = BytesMut::new();
        for _ in 0..64 {
            buf.put_u8(MARKER_STRICT_ARRAY);
            buf.put_u32(1);
        }
        buf.put_u8(MARKER_NULL);
        assert!(decode_all(buf.freeze()).is_err());
    }

    #[test]
    fn test_strict_array_and_date() {
        let values = vec![
            ScriptValue::StrictArray(vec![ScriptValue::Null, ScriptValue::Undefined]),
            ScriptValue::Date(1_700_000_000_000.0),
        ];
        assert_eq!(decode_all(encode_all(&values)).unwrap(), values);
    }
}
