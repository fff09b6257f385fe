// Wire formats shared by queue producers, consumers, and the broker.
//
// Three independent pieces live here:
// - the content codec that turns an opaque `Value` into body bytes and back,
//   including the versioned structured binary format,
// - the batch encoder that packs many encoded bodies into one JSON request,
// - the RPC schema used to dispatch a batch to a consumer and return its
//   ack/retry decisions.
//
// Nothing in this crate performs I/O.
pub mod batch;
pub mod codec;
pub mod content_type;
pub mod rpc;
pub mod structured;

pub use batch::{EncodedBatch, encode_batch};
pub use codec::{
    BufferPolicy, Payload, SerializedPayload, decode, decode_tagged, encode, encode_owned,
};
pub use content_type::ContentType;
pub use rpc::{
    EventOutcome, QueueParams, QueueResponse, QueueResult, RetryBatch, RetryMessage,
    RpcQueueMessage,
};

// Request paths, relative to the broker base URL the transport is bound to.
pub const PATH_MESSAGE: &str = "/message";
pub const PATH_BATCH: &str = "/batch";

pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
pub const CONTENT_TYPE_JSON: &str = "application/json";

// Message format tag, sent when a content type was chosen explicitly.
pub const HDR_MSG_FORMAT: &str = "X-Msg-Fmt";
pub const HDR_MSG_DELAY: &str = "X-Msg-Delay-Secs";
// Batch size metadata; the broker enforces its size policy from these.
pub const HDR_BATCH_COUNT: &str = "CF-Queue-Batch-Count";
pub const HDR_BATCH_BYTES: &str = "CF-Queue-Batch-Bytes";
pub const HDR_LARGEST_MSG: &str = "CF-Queue-Largest-Msg";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unsupported queue message content type: {0}")]
    InvalidContentType(String),
    #[error("unsupported queue message content type: {0:?}")]
    UnsupportedContentType(String),
    #[error(
        "content type \"{content_type}\" requires a value of type {expected}, but received: {received}"
    )]
    TypeMismatch {
        content_type: ContentType,
        expected: &'static str,
        received: &'static str,
    },
    #[error("failed to serialize message body")]
    Serialization(#[source] parcel_common::Error),
    #[error("failed to decode {content_type} message body: {reason}")]
    Deserialize {
        content_type: ContentType,
        reason: String,
    },
    #[error("message body cannot be undefined")]
    UndefinedBody,
    #[error("sendBatch() requires at least one message")]
    EmptyBatch,
    #[error("failed to encode rpc message")]
    RpcEncode(#[source] serde_json::Error),
    #[error("failed to decode rpc message")]
    RpcDecode(#[source] serde_json::Error),
}
