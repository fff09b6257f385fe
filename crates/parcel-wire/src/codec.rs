// Content codec: opaque `Value` <-> message body bytes for each content type.
use bytes::Bytes;
use parcel_common::Value;
use std::ops::Deref;

use crate::structured;
use crate::{ContentType, Error, Result};

// Whether encoding may borrow the caller's buffers or must produce a body that
// outlives the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    DeepCopy,
    ShallowReference,
}

/// Encoded message body.
///
/// `Borrowed` points into the source value and is only valid while that value
/// is; `Owned` holds (or shares, for `Bytes`) its own buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<'a> {
    Borrowed(&'a [u8]),
    Owned(Bytes),
}

impl Payload<'_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Borrowed(data) => data,
            Payload::Owned(bytes) => bytes.as_ref(),
        }
    }

    // Copies only when the payload still borrows from its source.
    pub fn into_owned(self) -> Bytes {
        match self {
            Payload::Borrowed(data) => Bytes::copy_from_slice(data),
            Payload::Owned(bytes) => bytes,
        }
    }
}

impl Deref for Payload<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Payload<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

// One encoded message ready for a send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedPayload<'a> {
    pub data: Payload<'a>,
    pub content_type: Option<ContentType>,
    pub delay_seconds: Option<u32>,
}

impl<'a> SerializedPayload<'a> {
    pub fn new(data: Payload<'a>) -> Self {
        Self {
            data,
            content_type: None,
            delay_seconds: None,
        }
    }
}

/// Encode `value` as `content_type`.
///
/// Under `ShallowReference`, text and byte bodies borrow from `value`. Under
/// `DeepCopy`, byte bodies share the source buffer by reference count instead
/// of copying it; text is copied. JSON and structured bodies are always owned.
///
/// ```
/// use parcel_common::Value;
/// use parcel_wire::{BufferPolicy, ContentType, encode};
///
/// let body = Value::from("hello");
/// let payload = encode(&body, ContentType::Text, BufferPolicy::ShallowReference).expect("encode");
/// assert_eq!(payload.as_slice(), b"hello");
/// ```
pub fn encode<'a>(
    value: &'a Value,
    content_type: ContentType,
    policy: BufferPolicy,
) -> Result<Payload<'a>> {
    if value.is_undefined() {
        return Err(Error::UndefinedBody);
    }
    match content_type {
        ContentType::Text => {
            let text = value
                .as_str()
                .ok_or_else(|| type_mismatch(content_type, "string", value))?;
            Ok(match policy {
                BufferPolicy::ShallowReference => Payload::Borrowed(text.as_bytes()),
                BufferPolicy::DeepCopy => Payload::Owned(Bytes::copy_from_slice(text.as_bytes())),
            })
        }
        ContentType::Bytes => {
            let bytes = value
                .as_bytes()
                .ok_or_else(|| type_mismatch(content_type, "bytes", value))?;
            Ok(match policy {
                BufferPolicy::ShallowReference => Payload::Borrowed(bytes),
                BufferPolicy::DeepCopy => Payload::Owned(bytes.clone()),
            })
        }
        ContentType::Json => {
            let json = value.to_json().map_err(Error::Serialization)?;
            Ok(Payload::Owned(Bytes::from(json)))
        }
        ContentType::Structured => Ok(Payload::Owned(structured::serialize(value)?)),
    }
}

// Encode by taking ownership of `value`. Text and byte buffers are moved into
// the payload without copying, leaving nothing behind for the caller.
pub fn encode_owned(value: Value, content_type: ContentType) -> Result<Payload<'static>> {
    match (content_type, value) {
        (_, Value::Undefined) => Err(Error::UndefinedBody),
        (ContentType::Text, Value::String(text)) => Ok(Payload::Owned(Bytes::from(text))),
        (ContentType::Bytes, Value::Bytes(bytes)) => Ok(Payload::Owned(bytes)),
        (content_type, value) => {
            encode(&value, content_type, BufferPolicy::DeepCopy).map(|payload| {
                Payload::Owned(payload.into_owned())
            })
        }
    }
}

/// Decode a body; `None` selects the structured default.
pub fn decode(body: Bytes, content_type: Option<ContentType>) -> Result<Value> {
    match content_type.unwrap_or_default() {
        // Invalid UTF-8 decodes with replacement characters rather than failing.
        ContentType::Text => Ok(Value::String(String::from_utf8_lossy(&body).into_owned())),
        ContentType::Bytes => Ok(Value::Bytes(body)),
        ContentType::Json => {
            let text = std::str::from_utf8(&body).map_err(|err| Error::Deserialize {
                content_type: ContentType::Json,
                reason: err.to_string(),
            })?;
            Value::from_json(text).map_err(|err| Error::Deserialize {
                content_type: ContentType::Json,
                reason: err.to_string(),
            })
        }
        ContentType::Structured => structured::deserialize(&body),
    }
}

// Decode a body carrying a raw wire tag (empty means structured). The data is
// copied so the result does not borrow from the reader it came from.
pub fn decode_tagged(data: &[u8], tag: &str) -> Result<Value> {
    let content_type = ContentType::from_wire(tag)?;
    decode(Bytes::copy_from_slice(data), Some(content_type))
}

fn type_mismatch(content_type: ContentType, expected: &'static str, value: &Value) -> Error {
    Error::TypeMismatch {
        content_type,
        expected,
        received: value.type_of(),
    }
}
