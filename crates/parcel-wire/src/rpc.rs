// RPC schema for dispatching a batch to a consumer and returning its decisions.
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// Terminal classification of one batch delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventOutcome {
    Ok,
    Exception,
    ExceededCpu,
}

impl EventOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            EventOutcome::Ok => "ok",
            EventOutcome::Exception => "exception",
            EventOutcome::ExceededCpu => "exceeded_cpu",
        }
    }
}

/// One delivered message as it crosses the RPC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcQueueMessage {
    pub id: String,
    pub timestamp_ns: i64,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    // Empty means the structured default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    pub attempts: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueParams {
    pub queue_name: String,
    pub messages: Vec<RpcQueueMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryBatch {
    pub retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryMessage {
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u32>,
}

// Full snapshot of a batch's ack/retry decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResult {
    pub ack_all: bool,
    pub retry_batch: RetryBatch,
    pub explicit_acks: Vec<String>,
    pub retry_messages: Vec<RetryMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResponse {
    pub outcome: EventOutcome,
    pub result: QueueResult,
}

impl QueueParams {
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(Error::RpcEncode)
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        serde_json::from_slice(input).map_err(Error::RpcDecode)
    }
}

impl QueueResponse {
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(Error::RpcEncode)
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        serde_json::from_slice(input).map_err(Error::RpcDecode)
    }
}

mod base64_bytes {
    use base64::Engine;
    use bytes::Bytes;
    use serde::Deserialize;
    use serde::de::Error;

    // Encode Bytes as base64 string for JSON payloads.
    pub fn serialize<S>(value: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        serializer.serialize_str(&encoded)
    }

    // Decode base64 string into Bytes.
    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Bytes, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}
