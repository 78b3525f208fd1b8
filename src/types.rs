use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Name of a job list in the work queue (e.g. `payment_jobs`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(pub String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Counter key tracking jobs currently being handled from this queue.
    pub fn processing_key(&self) -> String {
        format!("{}:processing", self.0)
    }

    /// Counter key tracking jobs whose handling raised an unexpected error.
    pub fn failed_key(&self) -> String {
        format!("{}:failed", self.0)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a payment or refund.
///
/// Strongly typed so entity ids are never mixed up with merchant ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the merchant owning an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MerchantId(pub String);

impl fmt::Display for MerchantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of entity a job settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Payment,
    Refund,
}

impl JobKind {
    /// Value of the envelope's `type` field.
    pub fn wire_type(self) -> &'static str {
        match self {
            JobKind::Payment => "PROCESS_PAYMENT",
            JobKind::Refund => "PROCESS_REFUND",
        }
    }

    /// Prefix of webhook event names (`payment.success`, `refund.failed`, ...).
    pub fn event_domain(self) -> &'static str {
        match self {
            JobKind::Payment => "payment",
            JobKind::Refund => "refund",
        }
    }

    fn id_field(self) -> &'static str {
        match self {
            JobKind::Payment => "payment_id",
            JobKind::Refund => "refund_id",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_domain())
    }
}

/// A queued instruction to settle one payment or refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    pub entity_id: EntityId,
}

/// Wire shape of a job:
/// `{"type": "PROCESS_PAYMENT", "payment_id": "..."}` or
/// `{"type": "PROCESS_REFUND", "refund_id": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
struct JobEnvelope {
    #[serde(rename = "type")]
    job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refund_id: Option<String>,
}

/// Result of decoding a raw queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Job(Job),
    /// Well-formed envelope with a `type` this worker does not handle.
    UnknownType(String),
}

impl Job {
    pub fn payment(id: impl Into<String>) -> Self {
        Self { kind: JobKind::Payment, entity_id: EntityId(id.into()) }
    }

    pub fn refund(id: impl Into<String>) -> Self {
        Self { kind: JobKind::Refund, entity_id: EntityId(id.into()) }
    }

    /// Serialize into the JSON envelope pushed onto the queue.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let id = Some(self.entity_id.0.clone());
        let envelope = match self.kind {
            JobKind::Payment => JobEnvelope {
                job_type: self.kind.wire_type().to_string(),
                payment_id: id,
                refund_id: None,
            },
            JobKind::Refund => JobEnvelope {
                job_type: self.kind.wire_type().to_string(),
                payment_id: None,
                refund_id: id,
            },
        };
        serde_json::to_string(&envelope)
    }

    /// Decode a raw queue item.
    pub fn decode(raw: &str) -> Result<Decoded, DecodeError> {
        let envelope: JobEnvelope =
            serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let kind = match envelope.job_type.as_str() {
            "PROCESS_PAYMENT" => JobKind::Payment,
            "PROCESS_REFUND" => JobKind::Refund,
            other => return Ok(Decoded::UnknownType(other.to_string())),
        };

        let id = match kind {
            JobKind::Payment => envelope.payment_id,
            JobKind::Refund => envelope.refund_id,
        };

        match id {
            Some(id) if !id.trim().is_empty() => Ok(Decoded::Job(Job {
                kind,
                entity_id: EntityId(id),
            })),
            _ => Err(DecodeError::MissingEntityId { field: kind.id_field() }),
        }
    }
}

/// Lifecycle status of a payment or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Success => "success",
            SettlementStatus::Failed => "failed",
        }
    }

    /// `success` and `failed` are final; nothing may move an entity out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, SettlementStatus::Success | SettlementStatus::Failed)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SettlementStatus::Pending),
            "processing" => Some(SettlementStatus::Processing),
            "success" => Some(SettlementStatus::Success),
            "failed" => Some(SettlementStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment or refund as seen by the settlement worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleableEntity {
    pub id: EntityId,
    pub kind: JobKind,
    pub status: SettlementStatus,
    /// Amount in minor units.
    pub amount: i64,
    pub merchant_id: MerchantId,
    /// Parent payment, for refunds only.
    pub payment_id: Option<EntityId>,
}

impl SettleableEntity {
    pub fn payment(id: impl Into<String>, merchant_id: impl Into<String>, amount: i64) -> Self {
        Self {
            id: EntityId(id.into()),
            kind: JobKind::Payment,
            status: SettlementStatus::Pending,
            amount,
            merchant_id: MerchantId(merchant_id.into()),
            payment_id: None,
        }
    }

    pub fn refund(
        id: impl Into<String>,
        payment_id: impl Into<String>,
        merchant_id: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self {
            id: EntityId(id.into()),
            kind: JobKind::Refund,
            status: SettlementStatus::Pending,
            amount,
            merchant_id: MerchantId(merchant_id.into()),
            payment_id: Some(EntityId(payment_id.into())),
        }
    }

    /// Webhook `data` object for this entity reporting `status`.
    pub fn webhook_data(&self, status: SettlementStatus) -> serde_json::Value {
        match self.kind {
            JobKind::Payment => serde_json::json!({
                "payment": {
                    "id": self.id.0,
                    "amount": self.amount,
                    "status": status.as_str(),
                }
            }),
            JobKind::Refund => serde_json::json!({
                "refund": {
                    "id": self.id.0,
                    "payment_id": self.payment_id.as_ref().map(|p| p.0.clone()),
                    "amount": self.amount,
                    "status": status.as_str(),
                }
            }),
        }
    }
}

/// Per-merchant webhook destination.
///
/// Either field may be missing; the notifier then skips delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub url: Option<String>,
    pub secret: Option<String>,
}

impl WebhookEndpoint {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            secret: Some(secret.into()),
        }
    }

    /// URL and secret, when both are present and non-empty.
    pub fn usable(&self) -> Option<(&str, &str)> {
        match (self.url.as_deref(), self.secret.as_deref()) {
            (Some(url), Some(secret)) if !url.is_empty() && !secret.is_empty() => {
                Some((url, secret))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }
}

/// One logged try of sending a webhook. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub merchant_id: MerchantId,
    pub event_type: String,
    pub webhook_url: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub status: AttemptStatus,
    pub response_code: Option<u16>,
    /// Set only when another attempt is scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
