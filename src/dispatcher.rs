use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{DecodeError, HandlerError, QueueError};
use crate::queue::{CounterStore, QueueNames, WorkQueue, RETRY_COUNT_KEY};
use crate::simulator::{SettleOutcome, SettlementSimulator};
use crate::types::{Decoded, Job, JobKind, QueueName};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queues to consume, in tie-break order.
    pub queues: QueueNames,
    /// Longest single blocking wait; bounds how long shutdown goes unnoticed.
    pub poll_interval: Duration,
    /// Fixed wait after a queue backend failure.
    pub outage_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queues: QueueNames::default(),
            poll_interval: Duration::from_secs(1),
            outage_backoff: Duration::from_secs(2),
        }
    }
}

/// What one dispatch cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing arrived within the poll interval.
    Idle,
    Settled {
        queue: QueueName,
        job: Job,
        outcome: SettleOutcome,
    },
    /// Undecodable payload. The job is lost: no retry, no dead letter.
    Dropped { queue: QueueName, error: DecodeError },
    /// Well-formed envelope of a type this worker does not handle.
    Ignored { queue: QueueName, job_type: String },
    /// Handler raised an unexpected error; counted in `{queue}:failed`.
    Failed { queue: QueueName, job: Job, error: String },
}

/// Single consumer of the work queue.
///
/// Jobs are handled strictly one at a time, end to end, including the
/// notifier's retry sleeps. A failing job never stops the loop; only a
/// queue backend failure triggers the loop's own backoff.
pub struct JobDispatcher {
    queue: Arc<dyn WorkQueue>,
    counters: Arc<dyn CounterStore>,
    simulator: Arc<SettlementSimulator>,
    config: DispatcherConfig,
}

impl JobDispatcher {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        counters: Arc<dyn CounterStore>,
        simulator: Arc<SettlementSimulator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            counters,
            simulator,
            config,
        }
    }

    /// Run on a background task until `shutdown` becomes `true`.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Dispatch loop.
    ///
    /// Once `shutdown` flips to `true` no further job is dequeued; a job
    /// already dequeued runs to completion first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queues = ?self.config.queues.dequeue_order(), "dispatcher started");

        while !*shutdown.borrow() {
            match self.run_once().await {
                Ok(outcome) => debug!(?outcome, "dispatch cycle complete"),
                Err(err) => {
                    error!(error = %err, "dequeue failed; backing off");
                    metric_inc("settlement.queue.outage");
                    if let Err(err) = self.counters.incr(RETRY_COUNT_KEY).await {
                        warn!(error = %err, "failed to bump retry counter");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.outage_backoff) => {}
                        _ = shutdown_requested(&mut shutdown) => {}
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// Wait up to one poll interval for a job and handle it.
    ///
    /// `Err` only for queue backend failures.
    pub async fn run_once(&self) -> Result<CycleOutcome, QueueError> {
        let order = self.config.queues.dequeue_order();
        let Some((queue, raw)) = self
            .queue
            .pop_blocking(&order, self.config.poll_interval)
            .await?
        else {
            return Ok(CycleOutcome::Idle);
        };

        self.handle(queue, &raw).await
    }

    /// Decode and handle one raw queue item popped from `queue`.
    pub async fn handle(&self, queue: QueueName, raw: &str) -> Result<CycleOutcome, QueueError> {
        match Job::decode(raw) {
            Ok(Decoded::Job(job)) => self.process(queue, job).await,
            Ok(Decoded::UnknownType(job_type)) => {
                debug!(queue = %queue, job_type = %job_type, "ignoring job of unknown type");
                Ok(CycleOutcome::Ignored { queue, job_type })
            }
            Err(error) => {
                warn!(queue = %queue, error = %error, payload = raw, "dropping undecodable job");
                metric_inc("settlement.job.dropped");
                Ok(CycleOutcome::Dropped { queue, error })
            }
        }
    }

    async fn process(&self, queue: QueueName, job: Job) -> Result<CycleOutcome, QueueError> {
        let processing =
            ProcessingGuard::acquire(self.counters.clone(), queue.processing_key()).await?;

        let result = AssertUnwindSafe(self.route(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic))));

        processing.release().await;

        match result {
            Ok(outcome) => {
                metric_inc("settlement.job.settled");
                Ok(CycleOutcome::Settled { queue, job, outcome })
            }
            Err(err) => {
                error!(queue = %queue, kind = %job.kind, entity_id = %job.entity_id, error = %err, "job failed");
                metric_inc("settlement.job.failed");
                if let Err(counter_err) = self.counters.incr(&queue.failed_key()).await {
                    error!(queue = %queue, error = %counter_err, "failed to bump failure counter");
                }
                Ok(CycleOutcome::Failed {
                    queue,
                    job,
                    error: err.to_string(),
                })
            }
        }
    }

    async fn route(&self, job: &Job) -> Result<SettleOutcome, HandlerError> {
        match job.kind {
            JobKind::Payment => self.simulator.settle_payment(&job.entity_id).await,
            JobKind::Refund => self.simulator.settle_refund(&job.entity_id).await,
        }
    }
}

/// Holds one `{queue}:processing` increment.
///
/// Released by [`ProcessingGuard::release`] on normal completion. If the
/// cycle future is dropped first (timeout, aborted task) the decrement is
/// spawned from `Drop` instead.
struct ProcessingGuard {
    counters: Arc<dyn CounterStore>,
    key: String,
    armed: bool,
}

impl ProcessingGuard {
    async fn acquire(counters: Arc<dyn CounterStore>, key: String) -> Result<Self, QueueError> {
        counters.incr(&key).await?;
        Ok(Self {
            counters,
            key,
            armed: true,
        })
    }

    async fn release(mut self) {
        if let Err(err) = self.counters.decr(&self.key).await {
            error!(key = %self.key, error = %err, "failed to release processing counter");
        }
        self.armed = false;
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(key = %self.key, "processing counter leaked: no runtime to release it");
            return;
        };
        let counters = self.counters.clone();
        let key = std::mem::take(&mut self.key);
        warn!(key = %key, "dispatch cycle cancelled; releasing processing counter");
        runtime.spawn(async move {
            if let Err(err) = counters.decr(&key).await {
                error!(key = %key, error = %err, "failed to release processing counter");
            }
        });
    }
}

/// Resolves once `true` is published. A dropped sender never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
