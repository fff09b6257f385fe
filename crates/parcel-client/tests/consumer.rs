// Consumer deliveries end to end, including the RPC round trip.
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use parcel_client::{
    AckRetryLedger, ClientConfig, ConsumerService, ConsumerTarget, DispatchParams,
    EventCoordinator, EventOutcome, ExecutionContext, MemoryTransport, MessageSendRequest,
    Producer, QueueEvent, QueueHandler, RetryOptions, RpcDispatcher, SendBatchOptions, Value,
    WaitPolicy, dispatch_remote,
};
use parcel_wire::{QueueParams, QueueResponse, RpcQueueMessage};
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(900);

fn rpc_params(ids: &[&str]) -> QueueParams {
    QueueParams {
        queue_name: "orders".to_string(),
        messages: ids
            .iter()
            .map(|id| RpcQueueMessage {
                id: id.to_string(),
                timestamp_ns: 1_700_000_000_000_000_000,
                data: Bytes::from(format!("body of {id}")),
                content_type: "text".to_string(),
                attempts: 1,
            })
            .collect(),
    }
}

struct RetryAllThenAck;

#[async_trait]
impl QueueHandler for RetryAllThenAck {
    async fn queue(&self, event: QueueEvent, _ctx: ExecutionContext) -> anyhow::Result<()> {
        event.retry_all(RetryOptions::with_delay(30));
        let m2 = event
            .messages()
            .iter()
            .find(|message| message.id() == "m2")
            .expect("m2 delivered");
        m2.ack();
        Ok(())
    }
}

// Carries every request and response through its JSON encoding.
struct WireLoopback(ConsumerService);

#[async_trait]
impl RpcDispatcher for WireLoopback {
    async fn queue(&self, params: QueueParams) -> anyhow::Result<QueueResponse> {
        let request = QueueParams::decode(&params.encode()?)?;
        let response = self.0.queue(request).await?;
        Ok(QueueResponse::decode(&response.encode()?)?)
    }
}

#[tokio::test]
async fn retry_all_then_ack_over_rpc() -> anyhow::Result<()> {
    for policy in [WaitPolicy::HandlerOnly, WaitPolicy::DrainBackground] {
        let service = ConsumerService::new(
            EventCoordinator::new(policy, LIMIT),
            ConsumerTarget::handler(RetryAllThenAck),
        );
        let dispatcher = WireLoopback(service);

        let mut ledger = AckRetryLedger::new();
        ledger.ack("left over from an earlier attempt");
        let outcome = dispatch_remote(
            &dispatcher,
            DispatchParams::Rpc(rpc_params(&["m1", "m2", "m3"])),
            &mut ledger,
        )
        .await?;

        assert_eq!(outcome, EventOutcome::Ok, "{policy:?}");
        assert_eq!(ledger.retry_batch(), Some(RetryOptions::with_delay(30)));
        assert_eq!(ledger.explicit_acks().count(), 0);
        assert!(!ledger.is_ack_all());
    }
    Ok(())
}

struct Hangs;

#[async_trait]
impl QueueHandler for Hangs {
    async fn queue(&self, event: QueueEvent, _ctx: ExecutionContext) -> anyhow::Result<()> {
        event.messages()[0].ack();
        event.messages()[1].retry(RetryOptions::with_delay(3));
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn hung_handler_reports_exceeded_cpu_with_prior_decisions() -> anyhow::Result<()> {
    let service = ConsumerService::new(
        EventCoordinator::new(WaitPolicy::HandlerOnly, LIMIT),
        ConsumerTarget::handler(Hangs),
    );
    let started = tokio::time::Instant::now();
    let response = service.queue(rpc_params(&["m1", "m2"])).await?;
    assert!(started.elapsed() >= LIMIT);

    assert_eq!(response.outcome, EventOutcome::ExceededCpu);
    assert_eq!(response.result.explicit_acks, vec!["m1".to_string()]);
    assert_eq!(response.result.retry_messages.len(), 1);
    assert_eq!(response.result.retry_messages[0].msg_id, "m2");
    assert_eq!(response.result.retry_messages[0].delay_seconds, Some(3));
    Ok(())
}

struct AcksEverything;

#[async_trait]
impl QueueHandler for AcksEverything {
    async fn queue(&self, event: QueueEvent, _ctx: ExecutionContext) -> anyhow::Result<()> {
        event.ack_all();
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn immediate_handler_does_not_wait_for_the_limit() -> anyhow::Result<()> {
    let config = ClientConfig::default();
    let service = ConsumerService::new(
        EventCoordinator::from_config(&config),
        ConsumerTarget::handler(AcksEverything),
    );
    let started = tokio::time::Instant::now();
    let response = service.queue(rpc_params(&["m1"])).await?;
    assert!(started.elapsed() < config.delivery_timeout());
    assert_eq!(response.outcome, EventOutcome::Ok);
    assert!(response.result.ack_all);
    Ok(())
}

#[tokio::test]
async fn no_target_is_an_exception() -> anyhow::Result<()> {
    let service = ConsumerService::new(
        EventCoordinator::new(WaitPolicy::HandlerOnly, LIMIT),
        ConsumerTarget::default(),
    );
    let response = service.queue(rpc_params(&["m1"])).await?;
    assert_eq!(response.outcome, EventOutcome::Exception);
    assert!(!response.result.ack_all);
    assert!(response.result.explicit_acks.is_empty());
    Ok(())
}

struct CollectBodies(tokio::sync::mpsc::UnboundedSender<Value>);

#[async_trait]
impl QueueHandler for CollectBodies {
    async fn queue(&self, event: QueueEvent, _ctx: ExecutionContext) -> anyhow::Result<()> {
        for message in event.messages() {
            self.0.send(message.body().clone())?;
            message.ack();
        }
        Ok(())
    }
}

#[tokio::test]
async fn produced_batch_is_consumed_with_original_bodies() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let producer = Producer::new(transport.clone(), &ClientConfig::default());
    let sent = vec![
        Value::object([("a", Value::from(1))]),
        Value::from(vec![1u8, 2, 3]),
        Value::from("plain text"),
        Value::Array(vec![Value::Null, Value::from(2.5)]),
    ];
    let tags = ["json", "bytes", "text", "v8"];
    let batch: Vec<_> = sent
        .iter()
        .zip(tags)
        .map(|(body, tag)| MessageSendRequest::new(body.clone()).with_content_type(tag))
        .collect();
    producer.send_batch(&batch, SendBatchOptions::default()).await?;

    // Act as the broker: turn the batch body into a delivery.
    let request = transport.last_request().expect("batch request");
    let parsed: serde_json::Value = serde_json::from_slice(&request.body)?;
    let messages = parsed["messages"]
        .as_array()
        .expect("messages")
        .iter()
        .enumerate()
        .map(|(index, item)| -> anyhow::Result<RpcQueueMessage> {
            let data = base64::engine::general_purpose::STANDARD
                .decode(item["body"].as_str().unwrap_or_default())?;
            Ok(RpcQueueMessage {
                id: format!("m{index}"),
                timestamp_ns: 0,
                data: Bytes::from(data),
                content_type: item["contentType"].as_str().unwrap_or_default().to_string(),
                attempts: 1,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let service = ConsumerService::new(
        EventCoordinator::new(WaitPolicy::HandlerOnly, LIMIT),
        ConsumerTarget::handler(CollectBodies(tx)),
    );
    let response = service
        .queue(QueueParams {
            queue_name: "orders".to_string(),
            messages,
        })
        .await?;
    assert_eq!(response.outcome, EventOutcome::Ok);
    assert_eq!(response.result.explicit_acks, vec!["m0", "m1", "m2", "m3"]);

    for expected in sent {
        assert_eq!(rx.recv().await, Some(expected));
    }
    Ok(())
}
