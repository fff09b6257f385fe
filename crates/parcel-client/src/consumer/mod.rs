// Consumer side: ledger, delivered messages, background work, coordination.
pub mod coordinator;
pub mod event;
pub mod ledger;
pub mod message;
pub mod tasks;

pub use coordinator::{
    AbortHandle, AbortSignal, ConsumerTarget, DeliveryReport, DeliveryState, DispatchParams,
    EventCoordinator, EventListeners, LocalQueueParams, QueueHandler, QueueListener, WaitPolicy,
};
pub use event::{CompletionStatus, QueueEvent};
pub use ledger::{AckRetryLedger, RetryOptions, SharedLedger};
pub use message::{IncomingQueueMessage, QueueMessage};
pub use tasks::{BackgroundTasks, ExecutionContext};
