// Delivered messages and the per-message ack/retry handle.
use bytes::Bytes;
use parcel_common::Value;
use parcel_wire::{ContentType, RpcQueueMessage};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::ledger::{RetryOptions, SharedLedger};
use crate::Result;

/// A message handed to the consumer by an in-process source.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingQueueMessage {
    pub id: String,
    pub timestamp: SystemTime,
    pub body: Bytes,
    // `None` selects the structured default.
    pub content_type: Option<ContentType>,
    pub attempts: u16,
}

impl IncomingQueueMessage {
    pub fn to_rpc(&self) -> RpcQueueMessage {
        RpcQueueMessage {
            id: self.id.clone(),
            timestamp_ns: to_epoch_nanos(self.timestamp),
            data: self.body.clone(),
            content_type: self
                .content_type
                .map(|content_type| content_type.as_str().to_string())
                .unwrap_or_default(),
            attempts: self.attempts,
        }
    }
}

/// One decoded message of a delivery, bound to the delivery's ledger.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    id: String,
    timestamp: SystemTime,
    body: Value,
    content_type: Option<ContentType>,
    attempts: u16,
    ledger: SharedLedger,
}

impl QueueMessage {
    // The body is copied out of the RPC record so it does not borrow from the
    // reader that produced it.
    pub(crate) fn from_rpc(message: &RpcQueueMessage, ledger: SharedLedger) -> Result<Self> {
        let body = parcel_wire::decode_tagged(&message.data, &message.content_type)?;
        let content_type = if message.content_type.is_empty() {
            None
        } else {
            Some(ContentType::from_wire(&message.content_type)?)
        };
        Ok(Self {
            id: message.id.clone(),
            timestamp: from_epoch_nanos(message.timestamp_ns),
            body,
            content_type,
            attempts: message.attempts,
            ledger,
        })
    }

    pub(crate) fn from_local(message: IncomingQueueMessage, ledger: SharedLedger) -> Result<Self> {
        let body = parcel_wire::decode(message.body, message.content_type)?;
        Ok(Self {
            id: message.id,
            timestamp: message.timestamp,
            body,
            content_type: message.content_type,
            attempts: message.attempts,
            ledger,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type.unwrap_or_default()
    }

    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    pub fn ack(&self) {
        self.ledger.ack(&self.id);
    }

    pub fn retry(&self, options: RetryOptions) {
        self.ledger.retry(&self.id, options);
    }
}

pub(crate) fn to_epoch_nanos(timestamp: SystemTime) -> i64 {
    match timestamp.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|nanos| -nanos)
            .unwrap_or(i64::MIN),
    }
}

pub(crate) fn from_epoch_nanos(nanos: i64) -> SystemTime {
    let offset = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    }
}
