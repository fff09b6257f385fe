// Producer: encodes messages and posts them to the broker.
pub mod transport;

use parcel_common::Value;
use parcel_wire::{
    BufferPolicy, CONTENT_TYPE_JSON, CONTENT_TYPE_OCTET_STREAM, ContentType, HDR_BATCH_BYTES,
    HDR_BATCH_COUNT, HDR_LARGEST_MSG, HDR_MSG_DELAY, HDR_MSG_FORMAT, PATH_BATCH, PATH_MESSAGE,
    SerializedPayload,
};

use crate::config::ClientConfig;
use crate::{Error, Result};

pub use transport::{BrokerRequest, BrokerResponse, MemoryTransport, Transport};

const HDR_CONTENT_TYPE: &str = "Content-Type";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    // Matched case-insensitively against text, bytes, json and v8.
    pub content_type: Option<String>,
    pub delay_seconds: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendBatchOptions {
    pub delay_seconds: Option<u32>,
}

/// One entry of a batch send.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSendRequest {
    pub body: Value,
    pub content_type: Option<String>,
    pub delay_seconds: Option<u32>,
}

impl MessageSendRequest {
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
            delay_seconds: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_delay(mut self, delay_seconds: u32) -> Self {
        self.delay_seconds = Some(delay_seconds);
        self
    }
}

/// Queue producer bound to one broker transport.
///
/// ```
/// use parcel_client::{ClientConfig, MemoryTransport, Producer, SendOptions, Value};
///
/// let transport = MemoryTransport::new();
/// let producer = Producer::new(transport.clone(), &ClientConfig::default());
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let options = SendOptions {
///         content_type: Some("text".to_string()),
///         delay_seconds: Some(5),
///     };
///     producer.send(Value::from("hello"), options).await.expect("send");
/// });
/// let request = transport.last_request().expect("request");
/// assert_eq!(request.header("X-Msg-Fmt"), Some("text"));
/// assert_eq!(&request.body[..], b"hello");
/// ```
pub struct Producer<T> {
    transport: T,
    json_messages_by_default: bool,
}

impl<T: Transport> Producer<T> {
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        Self {
            transport,
            json_messages_by_default: config.json_messages_by_default,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn send(&self, body: Value, options: SendOptions) -> Result<()> {
        let request = self.message_request(body, &options)?;
        self.post(request, "Queue send").await?;
        metrics::counter!("parcel_queue_send_total").increment(1);
        Ok(())
    }

    pub async fn send_batch(
        &self,
        messages: &[MessageSendRequest],
        options: SendBatchOptions,
    ) -> Result<()> {
        let request = self.batch_request(messages, &options)?;
        self.post(request, "Queue sendBatch").await?;
        metrics::counter!("parcel_queue_send_batch_total").increment(1);
        metrics::counter!("parcel_queue_batch_messages_total").increment(messages.len() as u64);
        Ok(())
    }

    fn message_request(&self, body: Value, options: &SendOptions) -> Result<BrokerRequest> {
        if body.is_undefined() {
            return Err(parcel_wire::Error::UndefinedBody.into());
        }
        let content_type = self.resolve_content_type(options.content_type.as_deref())?;

        let mut headers = vec![(HDR_CONTENT_TYPE, CONTENT_TYPE_OCTET_STREAM.to_string())];
        if let Some(content_type) = content_type {
            headers.push((HDR_MSG_FORMAT, content_type.as_str().to_string()));
        }
        if let Some(delay) = options.delay_seconds {
            headers.push((HDR_MSG_DELAY, delay.to_string()));
        }

        // The request outlives this call, so the body takes ownership of the
        // value's buffers.
        let body = parcel_wire::encode_owned(body, content_type.unwrap_or_default())?;
        Ok(BrokerRequest {
            path: PATH_MESSAGE,
            headers,
            body: body.into_owned(),
        })
    }

    fn batch_request(
        &self,
        messages: &[MessageSendRequest],
        options: &SendBatchOptions,
    ) -> Result<BrokerRequest> {
        if messages.is_empty() {
            return Err(parcel_wire::Error::EmptyBatch.into());
        }
        let mut payloads = Vec::with_capacity(messages.len());
        for message in messages {
            if message.body.is_undefined() {
                return Err(parcel_wire::Error::UndefinedBody.into());
            }
            let content_type = self.resolve_content_type(message.content_type.as_deref())?;
            // Borrowed only until the batch body below is written.
            let data = parcel_wire::encode(
                &message.body,
                content_type.unwrap_or_default(),
                BufferPolicy::ShallowReference,
            )?;
            payloads.push(SerializedPayload {
                data,
                content_type,
                delay_seconds: message.delay_seconds,
            });
        }
        let batch = parcel_wire::encode_batch(&payloads)?;

        let mut headers = vec![
            (HDR_BATCH_COUNT, batch.count.to_string()),
            (HDR_BATCH_BYTES, batch.total_bytes.to_string()),
            (HDR_LARGEST_MSG, batch.largest_message_bytes.to_string()),
            (HDR_CONTENT_TYPE, CONTENT_TYPE_JSON.to_string()),
        ];
        if let Some(delay) = options.delay_seconds {
            headers.push((HDR_MSG_DELAY, delay.to_string()));
        }
        Ok(BrokerRequest {
            path: PATH_BATCH,
            headers,
            body: batch.body,
        })
    }

    // Explicit tags win; untagged messages are JSON only when configured.
    fn resolve_content_type(&self, tag: Option<&str>) -> Result<Option<ContentType>> {
        match tag {
            Some(tag) => Ok(Some(ContentType::validate(tag)?)),
            None if self.json_messages_by_default => Ok(Some(ContentType::Json)),
            None => Ok(None),
        }
    }

    async fn post(&self, request: BrokerRequest, operation: &'static str) -> Result<()> {
        let path = request.path;
        let response = self
            .transport
            .post(request)
            .await
            .map_err(Error::Transport)?;
        if response.status != 200 {
            metrics::counter!("parcel_queue_send_failed_total").increment(1);
            tracing::debug!(
                operation,
                path,
                status = response.status,
                "broker rejected queue send"
            );
            return Err(Error::SendFailed {
                operation,
                status: response.status,
                status_text: response.status_text,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn producer(json_messages_by_default: bool) -> Producer<MemoryTransport> {
        let config = ClientConfig {
            json_messages_by_default,
            ..ClientConfig::default()
        };
        Producer::new(MemoryTransport::new(), &config)
    }

    #[test]
    fn untyped_send_uses_untagged_structured_body() {
        let request = producer(false)
            .message_request(Value::from(7), &SendOptions::default())
            .expect("request");
        assert_eq!(request.path, PATH_MESSAGE);
        assert_eq!(request.header("content-type"), Some(CONTENT_TYPE_OCTET_STREAM));
        assert_eq!(request.header(HDR_MSG_FORMAT), None);
        assert_eq!(
            parcel_wire::decode(request.body, None).expect("decode"),
            Value::from(7)
        );
    }

    #[test]
    fn json_by_default_tags_untyped_sends() {
        let request = producer(true)
            .message_request(
                Value::object([("a", Value::from(1))]),
                &SendOptions::default(),
            )
            .expect("request");
        assert_eq!(request.header(HDR_MSG_FORMAT), Some("json"));
        assert_eq!(&request.body[..], br#"{"a":1}"#);
    }

    #[test]
    fn explicit_tag_is_case_insensitive() {
        let options = SendOptions {
            content_type: Some("BYTES".to_string()),
            delay_seconds: None,
        };
        let request = producer(true)
            .message_request(Value::from(vec![1u8, 2]), &options)
            .expect("request");
        assert_eq!(request.header(HDR_MSG_FORMAT), Some("bytes"));
        assert_eq!(&request.body[..], &[1, 2]);
    }

    #[test]
    fn single_send_moves_byte_buffers() {
        let source = Bytes::from(vec![3u8; 64]);
        let ptr = source.as_ptr();
        let options = SendOptions {
            content_type: Some("bytes".to_string()),
            delay_seconds: None,
        };
        let request = producer(false)
            .message_request(Value::Bytes(source), &options)
            .expect("request");
        assert_eq!(request.body.as_ptr(), ptr);
    }

    #[test]
    fn invalid_content_type_is_rejected() {
        let options = SendOptions {
            content_type: Some("yaml".to_string()),
            delay_seconds: None,
        };
        let err = producer(false)
            .message_request(Value::from("x"), &options)
            .expect_err("invalid");
        assert!(matches!(
            err,
            Error::Wire(parcel_wire::Error::InvalidContentType(_))
        ));
    }

    #[test]
    fn undefined_body_is_rejected() {
        let err = producer(false)
            .message_request(Value::Undefined, &SendOptions::default())
            .expect_err("undefined");
        assert!(matches!(err, Error::Wire(parcel_wire::Error::UndefinedBody)));
    }

    #[test]
    fn batch_headers_carry_size_metadata() {
        let messages = [
            MessageSendRequest::new("abcd").with_content_type("text"),
            MessageSendRequest::new(vec![1u8, 2, 3, 4, 5, 6])
                .with_content_type("bytes")
                .with_delay(2),
        ];
        let options = SendBatchOptions {
            delay_seconds: Some(9),
        };
        let request = producer(false)
            .batch_request(&messages, &options)
            .expect("request");
        assert_eq!(request.path, PATH_BATCH);
        assert_eq!(request.header(HDR_BATCH_COUNT), Some("2"));
        assert_eq!(request.header(HDR_BATCH_BYTES), Some("10"));
        assert_eq!(request.header(HDR_LARGEST_MSG), Some("6"));
        assert_eq!(request.header(HDR_CONTENT_TYPE), Some(CONTENT_TYPE_JSON));
        assert_eq!(request.header(HDR_MSG_DELAY), Some("9"));
        assert_eq!(
            std::str::from_utf8(&request.body).expect("utf8"),
            r#"{"messages":[{"body":"YWJjZA==","contentType":"text"},{"body":"AQIDBAUG","contentType":"bytes","delaySecs":2}]}"#
        );
    }

    #[test]
    fn batch_type_errors_surface() {
        let messages = [
            MessageSendRequest::new("ok").with_content_type("text"),
            MessageSendRequest::new(5).with_content_type("text"),
        ];
        let err = producer(false)
            .batch_request(&messages, &SendBatchOptions::default())
            .expect_err("mismatch");
        assert!(matches!(
            err,
            Error::Wire(parcel_wire::Error::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn bodies_too_deep_for_consumers_fail_the_send() {
        let producer = producer(true);
        let deep = (0..=parcel_common::MAX_JSON_NESTING)
            .fold(Value::Null, |inner, _| Value::Array(vec![inner]));
        let err = producer
            .send(deep, SendOptions::default())
            .await
            .expect_err("too deep for json");
        assert!(matches!(
            err,
            Error::Wire(parcel_wire::Error::Serialization(
                parcel_common::Error::TooDeep { .. }
            ))
        ));

        let deep = (0..=parcel_wire::structured::MAX_DEPTH)
            .fold(Value::Null, |inner, _| Value::Array(vec![inner]));
        let err = producer
            .send_batch(
                &[MessageSendRequest::new(deep).with_content_type("v8")],
                SendBatchOptions::default(),
            )
            .await
            .expect_err("too deep for v8");
        assert!(matches!(
            err,
            Error::Wire(parcel_wire::Error::Serialization(
                parcel_common::Error::TooDeep { .. }
            ))
        ));
        assert!(producer.transport().requests().is_empty());
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = producer(false)
            .batch_request(&[], &SendBatchOptions::default())
            .expect_err("empty");
        assert!(matches!(err, Error::Wire(parcel_wire::Error::EmptyBatch)));
    }

    #[tokio::test]
    async fn non_200_is_send_failed() {
        let producer = producer(false);
        producer.transport().respond_with(413, "Payload Too Large");
        let err = producer
            .send(Value::from("x"), SendOptions::default())
            .await
            .expect_err("rejected");
        assert_eq!(err.to_string(), "Queue send failed: Payload Too Large");
        assert!(matches!(err, Error::SendFailed { status: 413, .. }));

        let err = producer
            .send_batch(&[MessageSendRequest::new("x")], SendBatchOptions::default())
            .await
            .expect_err("rejected");
        assert_eq!(err.to_string(), "Queue sendBatch failed: Payload Too Large");
    }
}
