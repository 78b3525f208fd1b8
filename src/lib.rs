//! Asynchronous settlement worker with signed webhook delivery.
//!
//! Producers (the HTTP API) enqueue `PROCESS_PAYMENT` / `PROCESS_REFUND`
//! jobs. A single [`JobDispatcher`] pops them one at a time, hands each
//! to the [`SettlementSimulator`], which persists a final status and asks
//! the [`WebhookNotifier`] to POST a signed callback to the merchant.
//!
//! ## Guarantees
//! - Jobs are handled strictly one at a time, end to end
//! - A settled payment or refund never leaves `success` / `failed`
//! - Every webhook try is logged as a [`DeliveryAttempt`]
//! - Webhook signatures are computed over the exact bytes sent
//! - A failing job never stops the dispatch loop
//!
//! ## Non-Guarantees
//! - Backpressure: queues are unbounded
//! - Redelivery of dropped or failed jobs (there is no dead-letter queue)
//! - Latency: webhook retry waits block the worker
//! - Retries for refund webhooks (single attempt by design)

mod config;
mod dispatcher;
mod error;
mod notifier;
mod queue;
mod retry;
mod signing;
mod simulator;
mod store;
pub mod telemetry;
mod transport;
mod types;

#[cfg(feature = "redis")]
mod queue_redis;

#[cfg(feature = "postgres")]
mod store_postgres;

pub use crate::config::{DatabaseSettings, QueueSettings, SettlementSettings, WebhookSettings, WorkerConfig};
pub use dispatcher::{CycleOutcome, DispatcherConfig, JobDispatcher};
pub use error::{
    DecodeError,
    HandlerError,
    NotifyError,
    QueueError,
    SigningError,
    StoreError,
    TransportError,
    VerificationError,
};
pub use notifier::{NotifyOutcome, WebhookNotifier, WebhookPayload};
pub use queue::{
    enqueue_job,
    queue_stats,
    reset,
    retry_count,
    CounterStore,
    InMemoryQueue,
    QueueNames,
    QueueStats,
    WorkQueue,
    RETRY_COUNT_KEY,
};
pub use retry::{classify, AttemptClass, RetrySchedule, MAX_ATTEMPTS};
pub use signing::{
    find_signature_header,
    sign,
    verify_signature,
    verify_webhook_request,
    SIGNATURE_HEADER,
};
pub use simulator::{OutcomeMode, SettleOutcome, SettlementSimulator, SimulatorConfig};
pub use store::{InMemoryStore, SettlementStore};
pub use transport::{HttpTransport, WebhookTransport, DEFAULT_REQUEST_TIMEOUT};
pub use types::{
    AttemptStatus,
    Decoded,
    DeliveryAttempt,
    EntityId,
    Job,
    JobKind,
    MerchantId,
    QueueName,
    SettleableEntity,
    SettlementStatus,
    WebhookEndpoint,
};

#[cfg(feature = "redis")]
pub use queue_redis::RedisQueue;

#[cfg(feature = "postgres")]
pub use store_postgres::PostgresStore;
