// Ack/retry decisions for one batch delivery.
//
// Conflicting or redundant calls never fail: a handler may legitimately race
// its own callbacks, so the first decision wins and later ones are logged and
// dropped. Whole-batch decisions dominate per-message ones.
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOptions {
    pub delay_seconds: Option<u32>,
}

impl RetryOptions {
    pub fn with_delay(delay_seconds: u32) -> Self {
        Self {
            delay_seconds: Some(delay_seconds),
        }
    }
}

/// Ledger state for one delivery.
///
/// ```
/// use parcel_client::{AckRetryLedger, RetryOptions};
///
/// let mut ledger = AckRetryLedger::new();
/// ledger.ack("m1");
/// ledger.retry("m1", RetryOptions::with_delay(5));
/// assert!(ledger.is_acked("m1"));
/// assert_eq!(ledger.retry_for("m1"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckRetryLedger {
    pub(crate) ack_all: bool,
    pub(crate) retry_batch: Option<RetryOptions>,
    pub(crate) explicit_acks: BTreeSet<String>,
    pub(crate) retries: BTreeMap<String, RetryOptions>,
}

impl AckRetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack(&mut self, id: &str) {
        if self.ack_all {
            // Already covered by the batch-wide ack.
            return;
        }
        if self.retry_batch.is_some() {
            tracing::warn!(
                message_id = id,
                "Received a call to ack() on message after retryAll() was already called on \
                 its batch. Calling ack() on a message after calling retryAll() on its batch \
                 is a no-op."
            );
            return;
        }
        if self.retries.contains_key(id) {
            tracing::warn!(
                message_id = id,
                "Received a call to ack() on message after retry() was already called on it. \
                 Calling ack() on a message after calling retry() on it is a no-op."
            );
            return;
        }
        if !self.explicit_acks.contains(id) {
            self.explicit_acks.insert(id.to_string());
        }
    }

    pub fn retry(&mut self, id: &str, options: RetryOptions) {
        if self.ack_all {
            tracing::warn!(
                message_id = id,
                "Received a call to retry() on message after ackAll() was already called on \
                 its batch. Calling retry() on a message after calling ackAll() on its batch \
                 is a no-op."
            );
            return;
        }
        if self.explicit_acks.contains(id) {
            tracing::warn!(
                message_id = id,
                "Received a call to retry() on message after ack() was already called on it. \
                 Calling retry() on a message after calling ack() on it is a no-op."
            );
            return;
        }
        // Later calls replace the delay of earlier ones.
        self.retries.insert(id.to_string(), options);
    }

    pub fn ack_all(&mut self) {
        if self.retry_batch.is_some() {
            tracing::warn!(
                "Received a call to ackAll() on a batch after retryAll() was already called. \
                 Calling ackAll() after calling retryAll() is a no-op."
            );
            return;
        }
        self.ack_all = true;
    }

    pub fn retry_all(&mut self, options: RetryOptions) {
        if self.ack_all {
            tracing::warn!(
                "Received a call to retryAll() on a batch after ackAll() was already called. \
                 Calling retryAll() after calling ackAll() is a no-op."
            );
            return;
        }
        self.retry_batch = Some(options);
    }

    pub fn is_ack_all(&self) -> bool {
        self.ack_all
    }

    // `Some` once retryAll() was accepted.
    pub fn retry_batch(&self) -> Option<RetryOptions> {
        self.retry_batch
    }

    pub fn is_acked(&self, id: &str) -> bool {
        self.explicit_acks.contains(id)
    }

    pub fn retry_for(&self, id: &str) -> Option<RetryOptions> {
        self.retries.get(id).copied()
    }

    /// Explicitly acked ids, sorted.
    pub fn explicit_acks(&self) -> impl Iterator<Item = &str> {
        self.explicit_acks.iter().map(String::as_str)
    }

    /// Per-message retries, sorted by id.
    pub fn retry_messages(&self) -> impl Iterator<Item = (&str, RetryOptions)> {
        self.retries
            .iter()
            .map(|(id, options)| (id.as_str(), *options))
    }
}

#[derive(Debug, Default)]
struct LedgerCell {
    ledger: AckRetryLedger,
    sealed: bool,
}

/// Handle to a delivery's ledger shared by the coordinator and message handles.
///
/// Each operation runs under one lock so its check-then-set is atomic. Once
/// sealed, every operation is ignored.
#[derive(Debug, Clone, Default)]
pub struct SharedLedger {
    inner: Arc<Mutex<LedgerCell>>,
}

impl SharedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack(&self, id: &str) {
        self.apply("ack", |ledger| ledger.ack(id));
    }

    pub fn retry(&self, id: &str, options: RetryOptions) {
        self.apply("retry", |ledger| ledger.retry(id, options));
    }

    pub fn ack_all(&self) {
        self.apply("ackAll", AckRetryLedger::ack_all);
    }

    pub fn retry_all(&self, options: RetryOptions) {
        self.apply("retryAll", |ledger| ledger.retry_all(options));
    }

    // Freeze the ledger and return its final state.
    pub fn seal(&self) -> AckRetryLedger {
        let mut cell = self.inner.lock();
        cell.sealed = true;
        cell.ledger.clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    pub fn snapshot(&self) -> AckRetryLedger {
        self.inner.lock().ledger.clone()
    }

    fn apply(&self, operation: &'static str, update: impl FnOnce(&mut AckRetryLedger)) {
        let mut cell = self.inner.lock();
        if cell.sealed {
            tracing::debug!(operation, "ignoring ledger call after the delivery resolved");
            return;
        }
        update(&mut cell.ledger);
    }
}
