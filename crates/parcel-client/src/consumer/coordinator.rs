// Drives one batch delivery from dispatch to a terminal outcome.
//
// Three signals race once the handler is running: the delivery's wall-clock
// limit, handler completion (as defined by the `WaitPolicy`), and an external
// abort. The first to fire decides the outcome; the ledger is sealed at that
// instant and its snapshot is what gets reported.
use anyhow::Context;
use async_trait::async_trait;
use parcel_wire::{EventOutcome, QueueParams, QueueResponse};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::event::{CompletionStatus, QueueEvent};
use super::ledger::{AckRetryLedger, SharedLedger};
use super::message::IncomingQueueMessage;
use super::tasks::{BackgroundTasks, ExecutionContext};
use crate::config::ClientConfig;
use crate::{Error, Result};

const HANDLER_TASK_LABEL: &str = "queue handler";

static NO_HANDLER_WARNING: Once = Once::new();

/// User code invoked once per delivery.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn queue(&self, event: QueueEvent, ctx: ExecutionContext) -> anyhow::Result<()>;
}

pub type QueueListener = Arc<dyn Fn(&QueueEvent, &ExecutionContext) + Send + Sync>;

/// Generic `queue` event listeners, used when no handler is registered.
#[derive(Clone, Default)]
pub struct EventListeners {
    listeners: Vec<QueueListener>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&QueueEvent, &ExecutionContext) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn dispatch(&self, event: &QueueEvent, ctx: &ExecutionContext) {
        for listener in &self.listeners {
            listener(event, ctx);
        }
    }
}

/// What a delivery is dispatched to. A handler takes precedence over
/// listeners.
#[derive(Clone, Default)]
pub struct ConsumerTarget {
    handler: Option<Arc<dyn QueueHandler>>,
    listeners: EventListeners,
}

impl ConsumerTarget {
    pub fn handler<H>(handler: H) -> Self
    where
        H: QueueHandler + 'static,
    {
        Self {
            handler: Some(Arc::new(handler)),
            listeners: EventListeners::default(),
        }
    }

    pub fn listeners(listeners: EventListeners) -> Self {
        Self {
            handler: None,
            listeners,
        }
    }
}

/// In-process form of a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalQueueParams {
    pub queue_name: String,
    pub messages: Vec<IncomingQueueMessage>,
}

/// A delivery as it arrives at the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchParams {
    Rpc(QueueParams),
    Local(LocalQueueParams),
}

impl DispatchParams {
    pub fn queue_name(&self) -> &str {
        match self {
            DispatchParams::Rpc(params) => &params.queue_name,
            DispatchParams::Local(params) => &params.queue_name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DispatchParams::Rpc(params) => params.messages.len(),
            DispatchParams::Local(params) => params.messages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Marshal into the RPC request form.
    pub fn into_rpc(self) -> QueueParams {
        match self {
            DispatchParams::Rpc(params) => params,
            DispatchParams::Local(params) => QueueParams {
                queue_name: params.queue_name,
                messages: params
                    .messages
                    .iter()
                    .map(IncomingQueueMessage::to_rpc)
                    .collect(),
            },
        }
    }

    fn into_event(self, ledger: SharedLedger) -> Result<QueueEvent> {
        match self {
            DispatchParams::Rpc(params) => QueueEvent::from_rpc(&params, ledger),
            DispatchParams::Local(params) => {
                QueueEvent::from_local(params.queue_name, params.messages, ledger)
            }
        }
    }
}

/// Raises the abort signal of one or more deliveries.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<Option<String>>,
}

impl AbortHandle {
    // Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }
}

/// Abort signal raised by the surrounding execution context.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<String>>,
}

impl AbortSignal {
    pub fn channel() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(None);
        (AbortHandle { tx }, AbortSignal { rx })
    }

    // A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    async fn aborted(&mut self) -> String {
        let reason = match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            // Every handle is gone without aborting.
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Dispatching,
    Running,
    Completed,
    Excepted,
    TimedOut,
    Aborted,
}

/// When a running delivery counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Finished when the handler's own future resolves. Background work it
    /// registered keeps running detached.
    HandlerOnly,
    /// Finished when every background task registered during the delivery,
    /// the handler included, has drained. Any failed task makes the outcome
    /// EXCEPTION.
    DrainBackground,
}

impl WaitPolicy {
    fn start<F>(self, handler: F, tasks: &BackgroundTasks) -> Running
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        match self {
            WaitPolicy::HandlerOnly => Running::Handler(tokio::spawn(handler)),
            WaitPolicy::DrainBackground => {
                tasks.wait_until(HANDLER_TASK_LABEL, handler);
                Running::Drain
            }
        }
    }
}

// What the completion signal waits on.
enum Running {
    Handler(JoinHandle<anyhow::Result<()>>),
    Drain,
}

impl Running {
    async fn finished(&mut self, tasks: &BackgroundTasks) -> DeliveryState {
        match self {
            Running::Handler(handle) => match handle.await {
                Ok(Ok(())) => DeliveryState::Completed,
                Ok(Err(_)) | Err(_) => DeliveryState::Excepted,
            },
            Running::Drain => {
                tasks.drain().await;
                match tasks.status() {
                    EventOutcome::Ok => DeliveryState::Completed,
                    _ => DeliveryState::Excepted,
                }
            }
        }
    }
}

enum Resolution {
    Finished(DeliveryState),
    TimedOut,
    Aborted(String),
}

/// Final record of one delivery.
pub struct DeliveryReport {
    pub queue_name: String,
    pub state: DeliveryState,
    pub outcome: EventOutcome,
    pub completion: CompletionStatus,
    pub ledger: AckRetryLedger,
    // Work that may still be running after the outcome was decided.
    pub background: BackgroundTasks,
    // Set when the delivery failed before the handler could run.
    pub error: Option<Error>,
}

impl DeliveryReport {
    pub fn to_response(&self) -> QueueResponse {
        crate::rpc::to_wire(&self.ledger, self.outcome)
    }

    fn failed_to_start(queue_name: String, error: Error) -> Self {
        Self {
            queue_name,
            state: DeliveryState::Excepted,
            outcome: EventOutcome::Exception,
            completion: CompletionStatus::Incomplete,
            ledger: AckRetryLedger::new(),
            background: BackgroundTasks::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCoordinator {
    policy: WaitPolicy,
    limit: Duration,
}

impl EventCoordinator {
    pub fn new(policy: WaitPolicy, limit: Duration) -> Self {
        Self { policy, limit }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.wait_policy(), config.delivery_timeout())
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Run one delivery to a terminal outcome. Must be called from within a
    /// tokio runtime.
    pub async fn run(
        &self,
        params: DispatchParams,
        target: &ConsumerTarget,
        mut abort: AbortSignal,
    ) -> DeliveryReport {
        let queue_name = params.queue_name().to_string();
        tracing::debug!(
            queue = %queue_name,
            batch_size = params.len(),
            policy = ?self.policy,
            state = ?DeliveryState::Dispatching,
            "dispatching queue delivery"
        );

        let ledger = SharedLedger::new();
        let event = match params.into_event(ledger) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(queue = %queue_name, error = %err, "failed to decode queue batch");
                return self.record(DeliveryReport::failed_to_start(queue_name, err));
            }
        };
        let tasks = BackgroundTasks::new();
        let ctx = ExecutionContext::new(tasks.clone());

        let mut running = if let Some(handler) = &target.handler {
            let handler = Arc::clone(handler);
            let handler_event = event.clone();
            let handler_ctx = ctx.clone();
            let work = async move {
                let result = handler.queue(handler_event.clone(), handler_ctx).await;
                handler_event.set_completion_status(match &result {
                    Ok(()) => CompletionStatus::CompletedSuccessfully,
                    Err(err) => CompletionStatus::CompletedWithError(format!("{err:#}")),
                });
                result
            };
            self.policy.start(work, &tasks)
        } else if !target.listeners.is_empty() {
            let dispatched = std::panic::catch_unwind(AssertUnwindSafe(|| {
                target.listeners.dispatch(&event, &ctx)
            }));
            if dispatched.is_err() {
                event.set_completion_status(CompletionStatus::CompletedWithError(
                    "queue listener panicked".to_string(),
                ));
                return self.resolve(event, &tasks, Resolution::Finished(DeliveryState::Excepted));
            }
            event.set_completion_status(CompletionStatus::CompletedSuccessfully);
            // Listeners can only continue asynchronously through background
            // tasks, so those define completion under either policy.
            Running::Drain
        } else {
            NO_HANDLER_WARNING.call_once(|| {
                tracing::warn!(
                    "received a queue event but the worker has no queue() handler and no \
                     queue event listeners"
                );
            });
            return self.record(DeliveryReport::failed_to_start(
                queue_name,
                Error::NoHandlerRegistered,
            ));
        };
        tracing::debug!(queue = %queue_name, state = ?DeliveryState::Running, "queue handler started");

        let limit = tokio::time::sleep(self.limit);
        tokio::pin!(limit);
        let resolution = tokio::select! {
            biased;
            _ = &mut limit => Resolution::TimedOut,
            state = running.finished(&tasks) => Resolution::Finished(state),
            reason = abort.aborted() => Resolution::Aborted(reason),
        };

        // A handler that lost the race keeps running; track it with the rest
        // of the delivery's background work.
        if let Running::Handler(handle) = running
            && !handle.is_finished()
        {
            tasks.wait_until(HANDLER_TASK_LABEL, async move {
                handle.await.context("queue handler task")?
            });
        }
        self.resolve(event, &tasks, resolution)
    }

    fn resolve(
        &self,
        event: QueueEvent,
        tasks: &BackgroundTasks,
        resolution: Resolution,
    ) -> DeliveryReport {
        let ledger = event.ledger().seal();
        let (state, outcome, abort_reason) = match resolution {
            Resolution::Finished(DeliveryState::Completed) => {
                (DeliveryState::Completed, EventOutcome::Ok, None)
            }
            Resolution::Finished(state) => (state, EventOutcome::Exception, None),
            Resolution::TimedOut => (DeliveryState::TimedOut, EventOutcome::ExceededCpu, None),
            Resolution::Aborted(reason) => {
                (DeliveryState::Aborted, EventOutcome::Exception, Some(reason))
            }
        };
        let completion = event.completion_status();
        if state != DeliveryState::Completed {
            tracing::warn!(
                queue = %event.queue_name(),
                state = ?state,
                completion = %completion,
                pending_tasks = ?tasks.trace(),
                abort_reason = ?abort_reason,
                "queue delivery did not complete"
            );
        }
        self.record(DeliveryReport {
            queue_name: event.queue_name().to_string(),
            state,
            outcome,
            completion,
            ledger,
            background: tasks.clone(),
            error: None,
        })
    }

    fn record(&self, report: DeliveryReport) -> DeliveryReport {
        metrics::counter!("parcel_queue_delivery_total", "outcome" => report.outcome.as_str())
            .increment(1);
        report
    }
}
