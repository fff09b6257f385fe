// Queue producer and consumer for a parcel broker.
//
// The producer side encodes messages and hands broker requests to a pluggable
// `Transport`. The consumer side owns one delivery at a time: it materializes
// the batch, runs the user handler, and races it against the delivery limit
// and an abort signal before reporting an outcome plus the ack/retry ledger.
//
// CONSUMER-SIDE DESIGN INTENT
// ---------------------------
// A delivery's ledger is shared between the coordinator and every message
// handle the handler holds, and the handler may keep running after the
// delivery has resolved (timeouts and aborts cancel the *wait*, not the work).
// The ledger is therefore:
// - guarded by one mutex so each check-then-set decision is atomic, and
// - sealed at resolution, so the reported snapshot is final even if the
//   handler keeps calling ack/retry afterwards.
//
// How the coordinator decides a delivery is "done" is a `WaitPolicy` chosen up
// front; the two policies never mix within one delivery.
pub mod config;
pub mod consumer;
pub mod producer;
pub mod rpc;

pub use config::ClientConfig;
pub use consumer::{
    AbortHandle, AbortSignal, AckRetryLedger, BackgroundTasks, CompletionStatus,
    ConsumerTarget, DeliveryReport, DeliveryState, DispatchParams, EventCoordinator,
    EventListeners, ExecutionContext, IncomingQueueMessage, LocalQueueParams, QueueEvent,
    QueueHandler, QueueMessage, RetryOptions, WaitPolicy,
};
pub use producer::{
    BrokerRequest, BrokerResponse, MemoryTransport, MessageSendRequest, Producer,
    SendBatchOptions, SendOptions, Transport,
};
pub use rpc::{ConsumerService, RpcDispatcher, dispatch_remote};

pub use parcel_common::Value;
pub use parcel_wire::{ContentType, EventOutcome};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Wire(#[from] parcel_wire::Error),
    #[error("{operation} failed: {status_text}")]
    SendFailed {
        operation: &'static str,
        status: u16,
        status_text: String,
    },
    #[error("handler does not export a queue() handler and no queue listeners are registered")]
    NoHandlerRegistered,
    #[error("transport error")]
    Transport(#[source] anyhow::Error),
    #[error("config error: {0}")]
    Config(String),
}
