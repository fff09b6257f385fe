// Background work registered during a delivery (waitUntil).
use futures::FutureExt;
use parcel_wire::EventOutcome;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;

/// Registry of background tasks spawned while handling one delivery.
///
/// Tasks run on the tokio runtime as soon as they are registered; the registry
/// only tracks which are still pending and whether any failed.
///
/// ```
/// use parcel_client::BackgroundTasks;
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let tasks = BackgroundTasks::new();
///     tasks.wait_until("flush", async { Ok(()) });
///     tasks.drain().await;
///     assert_eq!(tasks.pending(), 0);
/// });
/// ```
#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<TasksInner>,
}

struct TasksInner {
    state: Mutex<TaskState>,
    // Number of pending tasks; drain() waits for it to reach zero.
    pending: watch::Sender<usize>,
}

#[derive(Default)]
struct TaskState {
    next_id: u64,
    labels: BTreeMap<u64, String>,
    failures: Vec<String>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(TasksInner {
                state: Mutex::new(TaskState::default()),
                pending,
            }),
        }
    }

    /// Spawn `future` and track it until it finishes. Must be called from
    /// within a tokio runtime.
    pub fn wait_until<F>(&self, label: impl Into<String>, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.labels.insert(id, label.clone());
            id
        };
        self.inner.pending.send_modify(|count| *count += 1);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let failure = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{label}: {err:#}")),
                Err(_) => Some(format!("{label}: panicked")),
            };
            {
                let mut state = inner.state.lock();
                state.labels.remove(&id);
                if let Some(failure) = failure {
                    tracing::warn!(task = %label, error = %failure, "background task failed");
                    state.failures.push(failure);
                }
            }
            inner.pending.send_modify(|count| *count -= 1);
        });
    }

    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Labels of tasks that have not finished yet, in registration order.
    pub fn trace(&self) -> Vec<String> {
        self.inner.state.lock().labels.values().cloned().collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.inner.state.lock().failures.clone()
    }

    // EXCEPTION if any finished task failed, OK otherwise.
    pub fn status(&self) -> EventOutcome {
        if self.inner.state.lock().failures.is_empty() {
            EventOutcome::Ok
        } else {
            EventOutcome::Exception
        }
    }

    /// Wait until every registered task, including ones registered while
    /// draining, has finished.
    pub async fn drain(&self) {
        let mut pending = self.inner.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = pending.wait_for(|count| *count == 0).await;
    }
}

/// Handle passed to queue handlers for registering background work.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    tasks: BackgroundTasks,
}

impl ExecutionContext {
    pub fn new(tasks: BackgroundTasks) -> Self {
        Self { tasks }
    }

    pub fn wait_until<F>(&self, label: impl Into<String>, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tasks.wait_until(label, future);
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.tasks
    }
}
