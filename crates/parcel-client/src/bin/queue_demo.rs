//! Queue produce/consume demo.
//!
//! # Purpose
//! Sends a few messages through an in-memory broker transport, replays them
//! as one delivery through a consumer service over the RPC schema, and prints
//! the decisions the broker would receive back.
//!
//! # Notes
//! This is a developer-facing demo; it favors clarity over performance.
use anyhow::{Context, Result};
use async_trait::async_trait;
use parcel_client::{
    AckRetryLedger, ClientConfig, ConsumerService, ConsumerTarget, ContentType, DispatchParams,
    EventCoordinator, ExecutionContext, IncomingQueueMessage, LocalQueueParams, MemoryTransport,
    MessageSendRequest, Producer, QueueEvent, QueueHandler, RetryOptions, SendBatchOptions,
    SendOptions, Value, dispatch_remote,
};
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

struct DemoHandler;

#[async_trait]
impl QueueHandler for DemoHandler {
    async fn queue(&self, event: QueueEvent, ctx: ExecutionContext) -> Result<()> {
        for message in event.messages() {
            println!(
                "  handler saw {} (attempt {}): {:?}",
                message.id(),
                message.attempts(),
                message.body()
            );
        }
        event.retry_all(RetryOptions::with_delay(30));
        // No-op: the batch is already being retried.
        if let Some(message) = event.messages().get(1) {
            message.ack();
        }
        ctx.wait_until("audit log", async { Ok(()) });
        Ok(())
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

async fn run_demo() -> Result<()> {
    println!("== Parcel Queue Demo ==");
    let config = ClientConfig::from_env_or_yaml(None)?;

    println!("Step 1/3: sending messages through an in-memory transport.");
    let transport = MemoryTransport::new();
    let producer = Producer::new(transport.clone(), &config);
    producer
        .send(
            Value::from("hello"),
            SendOptions {
                content_type: Some("text".to_string()),
                delay_seconds: Some(5),
            },
        )
        .await?;
    producer
        .send(
            Value::object([("order", Value::from(42))]),
            SendOptions {
                content_type: Some("json".to_string()),
                delay_seconds: None,
            },
        )
        .await?;
    producer
        .send(Value::from(vec![1u8, 2, 3]), SendOptions::default())
        .await?;
    producer
        .send_batch(
            &[
                MessageSendRequest::new(Value::object([("a", Value::from(1))]))
                    .with_content_type("json"),
                MessageSendRequest::new(vec![1u8, 2, 3]).with_content_type("bytes"),
            ],
            SendBatchOptions::default(),
        )
        .await?;
    for request in transport.requests() {
        println!("  POST {} {:?} ({} bytes)", request.path, request.headers, request.body.len());
    }

    println!("Step 2/3: replaying single sends as one delivery.");
    let mut messages = Vec::new();
    for (index, request) in transport
        .requests()
        .into_iter()
        .filter(|request| request.path == parcel_wire::PATH_MESSAGE)
        .enumerate()
    {
        let content_type = request
            .header(parcel_wire::HDR_MSG_FORMAT)
            .map(ContentType::from_wire)
            .transpose()
            .context("decode message format header")?;
        messages.push(IncomingQueueMessage {
            id: format!("m{}", index + 1),
            timestamp: SystemTime::now(),
            body: request.body,
            content_type,
            attempts: 1,
        });
    }
    let params = DispatchParams::Local(LocalQueueParams {
        queue_name: "demo-queue".to_string(),
        messages,
    });

    println!("Step 3/3: dispatching over the rpc schema.");
    let service = ConsumerService::new(
        EventCoordinator::from_config(&config),
        ConsumerTarget::handler(DemoHandler),
    );
    let mut ledger = AckRetryLedger::new();
    let outcome = dispatch_remote(&service, params, &mut ledger).await?;
    println!("  outcome: {}", outcome.as_str());
    println!("  retry batch: {:?}", ledger.retry_batch());
    println!(
        "  explicit acks: {:?}",
        ledger.explicit_acks().collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    run_demo().await
}
