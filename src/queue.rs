use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};

use crate::error::QueueError;
use crate::types::{Job, JobKind, QueueName};

/// Global counter bumped once per dispatcher-loop-level failure.
pub const RETRY_COUNT_KEY: &str = "job_retry_count";

/// Durable FIFO job lists, one per queue name.
///
/// Producers may push concurrently from any task. There is a single
/// consumer. Queues are unbounded: producers never block and nothing
/// applies backpressure.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a raw job payload to the tail of `queue`.
    async fn push(&self, queue: &QueueName, payload: String) -> Result<(), QueueError>;

    /// Wait up to `wait` for any of `queues` to be non-empty, then pop
    /// the oldest item. When several are ready, the first one in
    /// `queues` order wins.
    ///
    /// `Ok(None)` means the wait elapsed with nothing available.
    async fn pop_blocking(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> Result<Option<(QueueName, String)>, QueueError>;

    /// Number of items waiting in `queue`.
    async fn len(&self, queue: &QueueName) -> Result<usize, QueueError>;

    /// Drop every item waiting in `queue`.
    async fn clear(&self, queue: &QueueName) -> Result<(), QueueError>;
}

/// Named integer counters with atomic updates.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn incr(&self, key: &str) -> Result<i64, QueueError>;
    async fn decr(&self, key: &str) -> Result<i64, QueueError>;
    /// Current value; unset counters read as zero.
    async fn get(&self, key: &str) -> Result<i64, QueueError>;
    async fn delete(&self, key: &str) -> Result<(), QueueError>;
}

/// Queue names for each job kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub payments: QueueName,
    pub refunds: QueueName,
}

impl QueueNames {
    pub fn for_kind(&self, kind: JobKind) -> &QueueName {
        match kind {
            JobKind::Payment => &self.payments,
            JobKind::Refund => &self.refunds,
        }
    }

    /// Dequeue order: payments first.
    pub fn dequeue_order(&self) -> Vec<QueueName> {
        vec![self.payments.clone(), self.refunds.clone()]
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            payments: QueueName::new("payment_jobs"),
            refunds: QueueName::new("refund_jobs"),
        }
    }
}

/// Encode `job` and push it to the queue matching its kind.
pub async fn enqueue_job(
    queue: &dyn WorkQueue,
    names: &QueueNames,
    job: &Job,
) -> Result<(), QueueError> {
    let payload = job.encode()?;
    queue.push(names.for_kind(job.kind), payload).await
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: i64,
    pub failed: i64,
}

/// Pending/processing/failed figures for every job queue.
pub async fn queue_stats(
    queue: &dyn WorkQueue,
    counters: &dyn CounterStore,
    names: &QueueNames,
) -> Result<HashMap<QueueName, QueueStats>, QueueError> {
    let mut stats = HashMap::new();
    for name in names.dequeue_order() {
        let entry = QueueStats {
            pending: queue.len(&name).await?,
            processing: counters.get(&name.processing_key()).await?,
            failed: counters.get(&name.failed_key()).await?,
        };
        stats.insert(name, entry);
    }
    Ok(stats)
}

/// Number of dispatcher-loop-level failures so far.
pub async fn retry_count(counters: &dyn CounterStore) -> Result<i64, QueueError> {
    counters.get(RETRY_COUNT_KEY).await
}

/// Empty both job lists and clear the global retry counter.
pub async fn reset(
    queue: &dyn WorkQueue,
    counters: &dyn CounterStore,
    names: &QueueNames,
) -> Result<(), QueueError> {
    for name in names.dequeue_order() {
        queue.clear(&name).await?;
    }
    counters.delete(RETRY_COUNT_KEY).await
}

/// In-process queue and counters for tests and single-binary setups.
///
/// Not durable across restarts.
#[derive(Default)]
pub struct InMemoryQueue {
    lists: Mutex<HashMap<QueueName, VecDeque<String>>>,
    counters: Mutex<HashMap<String, i64>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_pop(&self, queues: &[QueueName]) -> Option<(QueueName, String)> {
        let mut lists = self.lists.lock().await;
        for name in queues {
            if let Some(item) = lists.get_mut(name).and_then(|list| list.pop_front()) {
                return Some((name.clone(), item));
            }
        }
        None
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn push(&self, queue: &QueueName, payload: String) -> Result<(), QueueError> {
        self.lists
            .lock()
            .await
            .entry(queue.clone())
            .or_default()
            .push_back(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop_blocking(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> Result<Option<(QueueName, String)>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(found) = self.try_pop(queues).await {
                return Ok(Some(found));
            }
            // notify_one stores a permit, so a push between the check
            // above and this wait is not lost.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.try_pop(queues).await);
            }
        }
    }

    async fn len(&self, queue: &QueueName) -> Result<usize, QueueError> {
        Ok(self.lists.lock().await.get(queue).map_or(0, VecDeque::len))
    }

    async fn clear(&self, queue: &QueueName) -> Result<(), QueueError> {
        self.lists.lock().await.remove(queue);
        Ok(())
    }
}

#[async_trait]
impl CounterStore for InMemoryQueue {
    async fn incr(&self, key: &str) -> Result<i64, QueueError> {
        let mut counters = self.counters.lock().await;
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn decr(&self, key: &str) -> Result<i64, QueueError> {
        let mut counters = self.counters.lock().await;
        let value = counters.entry(key.to_string()).or_insert(0);
        *value -= 1;
        Ok(*value)
    }

    async fn get(&self, key: &str) -> Result<i64, QueueError> {
        Ok(self.counters.lock().await.get(key).copied().unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        self.counters.lock().await.remove(key);
        Ok(())
    }
}
