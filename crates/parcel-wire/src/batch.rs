// Batch-send encoder: packs encoded bodies into one JSON request body.
//
// Output shape, field order fixed, optional fields omitted when absent:
//   {"messages":[{"body":"<base64>","contentType":"<tag>","delaySecs":<n>},...]}
use base64::Engine;
use bytes::Bytes;

use crate::{Error, Result, SerializedPayload};

// Room for the JSON punctuation, field names, tag, and delay of one message.
pub const PER_MESSAGE_OVERHEAD: usize = 64;
// Room for the `{"messages":[` ... `]}` envelope.
pub const ENVELOPE_OVERHEAD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    pub body: Bytes,
    // Sum of the encoded (pre-base64) message sizes.
    pub total_bytes: usize,
    pub largest_message_bytes: usize,
    pub count: usize,
}

// Upper bound on the encoded body size, used to size the buffer up front.
pub fn estimated_len(total_bytes: usize, count: usize) -> usize {
    // (n + 2) / 3 * 4 == ceil(n / 3) * 4, the base64 expansion.
    (total_bytes + 2) / 3 * 4 + count * PER_MESSAGE_OVERHEAD + ENVELOPE_OVERHEAD
}

/// Encode a non-empty batch of messages, preserving their order.
///
/// ```
/// use bytes::Bytes;
/// use parcel_wire::{ContentType, Payload, SerializedPayload, encode_batch};
///
/// let mut message = SerializedPayload::new(Payload::Owned(Bytes::from_static(b"hi")));
/// message.content_type = Some(ContentType::Text);
/// let batch = encode_batch(&[message]).expect("encode");
/// assert_eq!(&batch.body[..], br#"{"messages":[{"body":"aGk=","contentType":"text"}]}"#);
/// assert_eq!((batch.count, batch.total_bytes, batch.largest_message_bytes), (1, 2, 2));
/// ```
pub fn encode_batch(messages: &[SerializedPayload<'_>]) -> Result<EncodedBatch> {
    if messages.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let count = messages.len();
    let mut total_bytes = 0usize;
    let mut largest_message_bytes = 0usize;
    for message in messages {
        let len = message.data.len();
        total_bytes += len;
        largest_message_bytes = largest_message_bytes.max(len);
    }

    let mut out = String::with_capacity(estimated_len(total_bytes, count));
    out.push_str("{\"messages\":[");
    for (index, message) in messages.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str("{\"body\":\"");
        // Encode straight into the output buffer; no intermediate allocation.
        base64::engine::general_purpose::STANDARD.encode_string(message.data.as_slice(), &mut out);
        out.push('"');
        if let Some(content_type) = message.content_type {
            out.push_str(",\"contentType\":\"");
            out.push_str(content_type.as_str());
            out.push('"');
        }
        if let Some(delay) = message.delay_seconds {
            out.push_str(",\"delaySecs\":");
            out.push_str(&delay.to_string());
        }
        out.push('}');
    }
    out.push_str("]}");
    debug_assert!(out.len() <= estimated_len(total_bytes, count));

    Ok(EncodedBatch {
        body: Bytes::from(out),
        total_bytes,
        largest_message_bytes,
        count,
    })
}
