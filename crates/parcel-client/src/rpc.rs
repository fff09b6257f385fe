// Ledger and batch marshaling across the consumer RPC boundary.
//
// A response is a full snapshot of the consumer's decisions. Applying one
// replaces the local ledger; it is never merged into it.
use async_trait::async_trait;
use parcel_wire::{
    EventOutcome, QueueParams, QueueResponse, QueueResult, RetryBatch, RetryMessage,
};

use crate::consumer::{
    AbortSignal, AckRetryLedger, ConsumerTarget, DispatchParams, EventCoordinator, RetryOptions,
};
use crate::{Error, Result};

/// Snapshot a ledger and outcome into the wire response.
///
/// ```
/// use parcel_client::{AckRetryLedger, EventOutcome, RetryOptions, rpc};
///
/// let mut ledger = AckRetryLedger::new();
/// ledger.retry_all(RetryOptions::with_delay(30));
/// let response = rpc::to_wire(&ledger, EventOutcome::Ok);
/// assert!(response.result.retry_batch.retry);
/// assert_eq!(response.result.retry_batch.delay_seconds, Some(30));
/// ```
pub fn to_wire(ledger: &AckRetryLedger, outcome: EventOutcome) -> QueueResponse {
    let retry_batch = match ledger.retry_batch() {
        Some(options) => RetryBatch {
            retry: true,
            delay_seconds: options.delay_seconds,
        },
        None => RetryBatch::default(),
    };
    QueueResponse {
        outcome,
        result: QueueResult {
            ack_all: ledger.is_ack_all(),
            retry_batch,
            explicit_acks: ledger.explicit_acks().map(str::to_string).collect(),
            retry_messages: ledger
                .retry_messages()
                .map(|(id, options)| RetryMessage {
                    msg_id: id.to_string(),
                    delay_seconds: options.delay_seconds,
                })
                .collect(),
        },
    }
}

/// Replace `ledger` with the snapshot carried by `response`.
pub fn from_wire(response: &QueueResponse, ledger: &mut AckRetryLedger) -> EventOutcome {
    let result = &response.result;
    ledger.ack_all = result.ack_all;
    ledger.retry_batch = result.retry_batch.retry.then_some(RetryOptions {
        delay_seconds: result.retry_batch.delay_seconds,
    });
    ledger.explicit_acks = result.explicit_acks.iter().cloned().collect();
    ledger.retries = result
        .retry_messages
        .iter()
        .map(|message| {
            (
                message.msg_id.clone(),
                RetryOptions {
                    delay_seconds: message.delay_seconds,
                },
            )
        })
        .collect();
    response.outcome
}

/// The remote end of a consumer dispatch.
#[async_trait]
pub trait RpcDispatcher: Send + Sync {
    async fn queue(&self, params: QueueParams) -> anyhow::Result<QueueResponse>;
}

/// Send a delivery to a remote consumer and apply the decisions it returns.
pub async fn dispatch_remote<D>(
    dispatcher: &D,
    params: DispatchParams,
    ledger: &mut AckRetryLedger,
) -> Result<EventOutcome>
where
    D: RpcDispatcher + ?Sized,
{
    let params = params.into_rpc();
    tracing::debug!(
        queue = %params.queue_name,
        batch_size = params.messages.len(),
        "dispatching queue delivery over rpc"
    );
    let response = dispatcher.queue(params).await.map_err(Error::Transport)?;
    Ok(from_wire(&response, ledger))
}

/// Serves RPC deliveries by running them through a local coordinator.
#[derive(Clone)]
pub struct ConsumerService {
    coordinator: EventCoordinator,
    target: ConsumerTarget,
}

impl ConsumerService {
    pub fn new(coordinator: EventCoordinator, target: ConsumerTarget) -> Self {
        Self {
            coordinator,
            target,
        }
    }
}

#[async_trait]
impl RpcDispatcher for ConsumerService {
    async fn queue(&self, params: QueueParams) -> anyhow::Result<QueueResponse> {
        let report = self
            .coordinator
            .run(DispatchParams::Rpc(params), &self.target, AbortSignal::never())
            .await;
        Ok(report.to_response())
    }
}
