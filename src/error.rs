use thiserror::Error;

use crate::types::{EntityId, JobKind};

/// Errors raised by the work queue or counter backend.
///
/// Any of these in the dispatcher's blocking dequeue counts as a
/// backend outage: the loop backs off and retries.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backend could not be reached or rejected the command.
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    /// Job could not be serialized for the queue.
    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

/// Errors raised by the settlement persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: JobKind, id: EntityId },

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Unexpected failure while handling a single job.
///
/// Counted in `{queue}:failed`; the job is not re-enqueued.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Internal notifier failures. Logged, never returned to callers of
/// [`WebhookNotifier::notify`](crate::WebhookNotifier::notify).
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode webhook payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// The HMAC could not be keyed with the merchant secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("invalid webhook signing key")]
    InvalidKey,
}

/// Reasons a raw queue item could not be turned into a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed job payload: {0}")]
    Malformed(String),

    #[error("job payload is missing `{field}`")]
    MissingEntityId { field: &'static str },
}

/// Failure to obtain any HTTP response from a webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to build client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Receiver-side signature verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("signature header missing")]
    MissingSignature,

    #[error("signature does not match payload")]
    InvalidSignature,
}
