// Versioned structured binary format for arbitrary `Value` bodies.
//
// Layout: a 0xFF marker, the format version as a varint, then one tagged value.
// Consumers across the fleet may run older revisions, so the writer always
// emits FORMAT_VERSION; raising it needs a coordinated rollout of readers first.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parcel_common::Value;

use crate::{ContentType, Error, Result};

pub const FORMAT_VERSION: u32 = 15;
const VERSION_MARKER: u8 = 0xFF;
pub const MAX_DEPTH: usize = 256;

const TAG_UNDEFINED: u8 = b'_';
const TAG_NULL: u8 = b'0';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';
const TAG_INT32: u8 = b'I';
const TAG_DOUBLE: u8 = b'N';
const TAG_STRING: u8 = b'S';
const TAG_BYTES: u8 = b'B';
const TAG_BEGIN_ARRAY: u8 = b'A';
const TAG_END_ARRAY: u8 = b'$';
const TAG_BEGIN_OBJECT: u8 = b'o';
const TAG_END_OBJECT: u8 = b'{';

/// Serialize a value with the pinned format version.
///
/// ```
/// use parcel_common::Value;
/// use parcel_wire::structured;
///
/// let value = Value::object([("n", Value::from(7)), ("s", Value::from("hi"))]);
/// let bytes = structured::serialize(&value).expect("encode");
/// assert_eq!(structured::deserialize(&bytes).expect("decode"), value);
/// ```
pub fn serialize(value: &Value) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(VERSION_MARKER);
    put_varint(&mut buf, u64::from(FORMAT_VERSION));
    write_value(&mut buf, value, 0)?;
    Ok(buf.freeze())
}

pub fn deserialize(data: &[u8]) -> Result<Value> {
    let mut buf = data;
    if buf.remaining() < 2 || buf.get_u8() != VERSION_MARKER {
        return Err(malformed("missing version header"));
    }
    let version = get_varint(&mut buf)?;
    if version == 0 || version > u64::from(FORMAT_VERSION) {
        return Err(malformed(format!("unsupported format version {version}")));
    }
    let value = read_value(&mut buf, 0)?;
    if buf.has_remaining() {
        return Err(malformed("trailing bytes after value"));
    }
    Ok(value)
}

// Mirrors the depth limit `read_value` enforces.
fn write_value(buf: &mut BytesMut, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::Serialization(parcel_common::Error::TooDeep {
            limit: MAX_DEPTH,
        }));
    }
    match value {
        Value::Undefined => buf.put_u8(TAG_UNDEFINED),
        Value::Null => buf.put_u8(TAG_NULL),
        Value::Bool(true) => buf.put_u8(TAG_TRUE),
        Value::Bool(false) => buf.put_u8(TAG_FALSE),
        Value::Number(n) => match as_int32(*n) {
            Some(int) => {
                buf.put_u8(TAG_INT32);
                put_varint(buf, u64::from(zigzag(int)));
            }
            None => {
                buf.put_u8(TAG_DOUBLE);
                buf.put_f64_le(*n);
            }
        },
        Value::String(s) => {
            buf.put_u8(TAG_STRING);
            put_len_prefixed(buf, s.as_bytes());
        }
        Value::Bytes(bytes) => {
            buf.put_u8(TAG_BYTES);
            put_len_prefixed(buf, bytes);
        }
        Value::Array(items) => {
            buf.put_u8(TAG_BEGIN_ARRAY);
            put_varint(buf, items.len() as u64);
            for item in items {
                write_value(buf, item, depth + 1)?;
            }
            buf.put_u8(TAG_END_ARRAY);
            put_varint(buf, items.len() as u64);
        }
        Value::Object(entries) => {
            buf.put_u8(TAG_BEGIN_OBJECT);
            for (key, item) in entries {
                buf.put_u8(TAG_STRING);
                put_len_prefixed(buf, key.as_bytes());
                write_value(buf, item, depth + 1)?;
            }
            buf.put_u8(TAG_END_OBJECT);
            put_varint(buf, entries.len() as u64);
        }
    }
    Ok(())
}

fn read_value(buf: &mut &[u8], depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(malformed("nesting too deep"));
    }
    if !buf.has_remaining() {
        return Err(malformed("unexpected end of input"));
    }
    let value = match buf.get_u8() {
        TAG_UNDEFINED => Value::Undefined,
        TAG_NULL => Value::Null,
        TAG_TRUE => Value::Bool(true),
        TAG_FALSE => Value::Bool(false),
        TAG_INT32 => {
            let raw = get_varint(buf)?;
            let raw = u32::try_from(raw).map_err(|_| malformed("int32 out of range"))?;
            Value::Number(f64::from(unzigzag(raw)))
        }
        TAG_DOUBLE => {
            if buf.remaining() < 8 {
                return Err(malformed("truncated double"));
            }
            Value::Number(buf.get_f64_le())
        }
        TAG_STRING => Value::String(read_string(buf)?),
        TAG_BYTES => {
            let bytes = read_len_prefixed(buf)?;
            Value::Bytes(Bytes::copy_from_slice(bytes))
        }
        TAG_BEGIN_ARRAY => {
            let len = get_varint(buf)?;
            // Cap the preallocation; the declared length is untrusted.
            let mut items = Vec::with_capacity((len as usize).min(buf.remaining()));
            for _ in 0..len {
                items.push(read_value(buf, depth + 1)?);
            }
            expect_tag(buf, TAG_END_ARRAY)?;
            if get_varint(buf)? != len {
                return Err(malformed("array length mismatch"));
            }
            Value::Array(items)
        }
        TAG_BEGIN_OBJECT => {
            let mut entries = Vec::new();
            loop {
                if !buf.has_remaining() {
                    return Err(malformed("unterminated object"));
                }
                if buf.chunk()[0] == TAG_END_OBJECT {
                    buf.advance(1);
                    break;
                }
                expect_tag(buf, TAG_STRING)?;
                let key = read_string(buf)?;
                let item = read_value(buf, depth + 1)?;
                entries.push((key, item));
            }
            if get_varint(buf)? != entries.len() as u64 {
                return Err(malformed("object property count mismatch"));
            }
            Value::Object(entries)
        }
        tag => return Err(malformed(format!("unknown tag 0x{tag:02x}"))),
    };
    Ok(value)
}

fn as_int32(n: f64) -> Option<i32> {
    // -0.0 must keep its sign, so it stays a double.
    if n.fract() != 0.0 || (n == 0.0 && n.is_sign_negative()) {
        return None;
    }
    if n < f64::from(i32::MIN) || n > f64::from(i32::MAX) {
        return None;
    }
    Some(n as i32)
}

fn zigzag(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

fn unzigzag(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn get_varint(buf: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(malformed("truncated varint"));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(malformed("varint too long"))
}

fn put_len_prefixed(buf: &mut BytesMut, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn read_len_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = get_varint(buf)?;
    let len = usize::try_from(len).map_err(|_| malformed("length overflow"))?;
    if buf.remaining() < len {
        return Err(malformed("truncated payload"));
    }
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_string(buf: &mut &[u8]) -> Result<String> {
    let bytes = read_len_prefixed(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed("invalid utf-8 in string"))
}

fn expect_tag(buf: &mut &[u8], tag: u8) -> Result<()> {
    if !buf.has_remaining() || buf.get_u8() != tag {
        return Err(malformed(format!("expected tag '{}'", tag as char)));
    }
    Ok(())
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::Deserialize {
        content_type: ContentType::Structured,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::object([
            ("int", Value::from(-42)),
            ("big", Value::from(1e12)),
            ("frac", Value::from(0.25)),
            ("text", Value::from("héllo")),
            ("raw", Value::from(vec![0u8, 1, 255])),
            (
                "list",
                Value::Array(vec![Value::Null, Value::Bool(true), Value::Undefined]),
            ),
            ("nested", Value::object([("empty", Value::Array(vec![]))])),
        ])
    }

    #[test]
    fn round_trip_preserves_structure() {
        let value = sample();
        let bytes = serialize(&value).expect("encode");
        assert_eq!(deserialize(&bytes).expect("decode"), value);
    }

    #[test]
    fn header_carries_pinned_version() {
        let bytes = serialize(&Value::Null).expect("encode");
        assert_eq!(bytes[0], VERSION_MARKER);
        assert_eq!(u32::from(bytes[1]), FORMAT_VERSION);
        assert_eq!(&bytes[2..], &[TAG_NULL]);
    }

    #[test]
    fn negative_zero_keeps_its_sign() {
        let bytes = serialize(&Value::from(-0.0)).expect("encode");
        let Value::Number(n) = deserialize(&bytes).expect("decode") else {
            panic!("expected number");
        };
        assert!(n == 0.0 && n.is_sign_negative());
    }

    #[test]
    fn older_versions_are_readable() {
        let bytes = [VERSION_MARKER, 13, TAG_TRUE];
        assert_eq!(deserialize(&bytes).expect("decode"), Value::Bool(true));
    }

    #[test]
    fn newer_versions_are_rejected() {
        let bytes = [VERSION_MARKER, 16, TAG_TRUE];
        let err = deserialize(&bytes).expect_err("newer");
        assert!(matches!(err, Error::Deserialize { content_type: ContentType::Structured, .. }));
    }

    fn nested_arrays(levels: usize) -> Value {
        (0..levels).fold(Value::Null, |inner, _| Value::Array(vec![inner]))
    }

    #[test]
    fn writer_and_reader_share_the_depth_limit() {
        let deepest = nested_arrays(MAX_DEPTH);
        let bytes = serialize(&deepest).expect("encode");
        assert_eq!(deserialize(&bytes).expect("decode"), deepest);

        let err = serialize(&nested_arrays(MAX_DEPTH + 1)).expect_err("too deep");
        assert!(matches!(
            err,
            Error::Serialization(parcel_common::Error::TooDeep { limit: MAX_DEPTH })
        ));
    }

    #[test]
    fn malformed_input_is_an_error() {
        let full = serialize(&sample()).expect("encode");
        for cut in [0, 1, 2, full.len() / 2, full.len() - 1] {
            assert!(deserialize(&full[..cut]).is_err(), "cut at {cut}");
        }
        let mut trailing = full.to_vec();
        trailing.push(TAG_NULL);
        assert!(deserialize(&trailing).is_err());
        assert!(deserialize(b"plain text").is_err());
    }
}
