// The batch handed to a queue handler.
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::ledger::{RetryOptions, SharedLedger};
use super::message::{IncomingQueueMessage, QueueMessage};
use crate::Result;
use parcel_wire::QueueParams;

/// How far the handler got, as observed by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CompletionStatus {
    #[default]
    Incomplete,
    CompletedSuccessfully,
    CompletedWithError(String),
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Incomplete => f.write_str("Incomplete"),
            CompletionStatus::CompletedSuccessfully => f.write_str("Completed successfully"),
            CompletionStatus::CompletedWithError(reason) => {
                write!(f, "Completed with error: {reason}")
            }
        }
    }
}

/// One delivered batch. Cloning shares the messages, the ledger, and the
/// completion status.
#[derive(Clone)]
pub struct QueueEvent {
    inner: Arc<EventInner>,
}

struct EventInner {
    queue_name: String,
    messages: Vec<QueueMessage>,
    ledger: SharedLedger,
    completion: Mutex<CompletionStatus>,
}

impl QueueEvent {
    pub(crate) fn from_rpc(params: &QueueParams, ledger: SharedLedger) -> Result<Self> {
        let messages = params
            .messages
            .iter()
            .map(|message| QueueMessage::from_rpc(message, ledger.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(params.queue_name.clone(), messages, ledger))
    }

    pub(crate) fn from_local(
        queue_name: String,
        messages: Vec<IncomingQueueMessage>,
        ledger: SharedLedger,
    ) -> Result<Self> {
        let messages = messages
            .into_iter()
            .map(|message| QueueMessage::from_local(message, ledger.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(queue_name, messages, ledger))
    }

    fn new(queue_name: String, messages: Vec<QueueMessage>, ledger: SharedLedger) -> Self {
        Self {
            inner: Arc::new(EventInner {
                queue_name,
                messages,
                ledger,
                completion: Mutex::new(CompletionStatus::Incomplete),
            }),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.queue_name
    }

    pub fn messages(&self) -> &[QueueMessage] {
        &self.inner.messages
    }

    pub fn ack_all(&self) {
        self.inner.ledger.ack_all();
    }

    pub fn retry_all(&self, options: RetryOptions) {
        self.inner.ledger.retry_all(options);
    }

    pub fn completion_status(&self) -> CompletionStatus {
        self.inner.completion.lock().clone()
    }

    pub(crate) fn set_completion_status(&self, status: CompletionStatus) {
        *self.inner.completion.lock() = status;
    }

    pub(crate) fn ledger(&self) -> &SharedLedger {
        &self.inner.ledger
    }
}
