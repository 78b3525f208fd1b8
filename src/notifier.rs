use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{NotifyError, TransportError};
use crate::retry::{classify, AttemptClass, RetrySchedule};
use crate::signing::sign;
use crate::store::SettlementStore;
use crate::transport::WebhookTransport;
use crate::types::{AttemptStatus, DeliveryAttempt, JobKind, SettleableEntity, SettlementStatus};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Body of a webhook callback.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    /// `<payment|refund>.<status>`.
    pub event: String,
    pub data: serde_json::Value,
    /// Unix seconds.
    pub created_at: i64,
}

impl WebhookPayload {
    pub fn for_entity(entity: &SettleableEntity, status: SettlementStatus, now: DateTime<Utc>) -> Self {
        Self {
            event: format!("{}.{}", entity.kind.event_domain(), status),
            data: entity.webhook_data(status),
            created_at: now.timestamp(),
        }
    }
}

/// How a notification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Merchant has no usable webhook URL/secret; nothing was sent.
    Skipped,
    Delivered { attempts: u32 },
    Failed { attempts: u32 },
    /// Notification aborted on an internal error (already logged).
    Errored,
}

/// Sends signed webhook callbacks and logs every attempt.
///
/// Payment notifications retry on 5xx and transport errors following
/// the configured [`RetrySchedule`]. Refund notifications are sent
/// once and only a transport error marks them failed; the response
/// status is not inspected.
pub struct WebhookNotifier {
    store: Arc<dyn SettlementStore>,
    transport: Arc<dyn WebhookTransport>,
    schedule: RetrySchedule,
}

struct Delivery<'a> {
    entity: &'a SettleableEntity,
    event: &'a str,
    url: &'a str,
    signature: &'a str,
    body: &'a [u8],
}

impl WebhookNotifier {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        transport: Arc<dyn WebhookTransport>,
        schedule: RetrySchedule,
    ) -> Self {
        Self { store, transport, schedule }
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Notify the owning merchant that `entity` reached `status`.
    ///
    /// Never fails; internal errors are logged and reported as
    /// [`NotifyOutcome::Errored`].
    pub async fn notify(&self, entity: &SettleableEntity, status: SettlementStatus) -> NotifyOutcome {
        match self.try_notify(entity, status).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(entity_id = %entity.id, kind = %entity.kind, error = %err, "webhook notification aborted");
                metric_inc("webhook.notify.errored");
                NotifyOutcome::Errored
            }
        }
    }

    async fn try_notify(
        &self,
        entity: &SettleableEntity,
        status: SettlementStatus,
    ) -> Result<NotifyOutcome, NotifyError> {
        let endpoint = self.store.webhook_endpoint(&entity.merchant_id).await?;
        let Some((url, secret)) = endpoint.as_ref().and_then(|e| e.usable()) else {
            debug!(merchant_id = %entity.merchant_id, "no webhook configured; skipping");
            return Ok(NotifyOutcome::Skipped);
        };

        let payload = WebhookPayload::for_entity(entity, status, Utc::now());
        // Sign the exact bytes that are sent.
        let body = serde_json::to_vec(&payload)?;
        let signature = sign(secret.as_bytes(), &body)?;

        let delivery = Delivery {
            entity,
            event: &payload.event,
            url,
            signature: &signature,
            body: &body,
        };

        Ok(match entity.kind {
            JobKind::Payment => self.deliver_with_retry(&delivery).await,
            JobKind::Refund => self.deliver_once(&delivery).await,
        })
    }

    async fn deliver_with_retry(&self, delivery: &Delivery<'_>) -> NotifyOutcome {
        let max_attempts = self.schedule.max_attempts();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.schedule.delay_before(attempt)).await;
            }

            let result = self
                .transport
                .post(delivery.url, delivery.signature, delivery.body)
                .await;
            let class = classify(&result);
            let will_retry = class == AttemptClass::Retryable && attempt < max_attempts;

            let next_retry_at = if will_retry {
                self.schedule
                    .next_retry_delay(attempt)
                    .and_then(|d| chrono::Duration::from_std(d).ok())
                    .map(|d| Utc::now() + d)
            } else {
                None
            };

            let status = if class == AttemptClass::Delivered {
                AttemptStatus::Success
            } else {
                AttemptStatus::Failed
            };
            self.record(delivery, attempt, status, &result, next_retry_at).await;

            match class {
                AttemptClass::Delivered => {
                    info!(event = delivery.event, url = delivery.url, attempt, "webhook delivered");
                    metric_inc("webhook.delivery.success");
                    return NotifyOutcome::Delivered { attempts: attempt };
                }
                AttemptClass::Terminal => {
                    warn!(
                        event = delivery.event,
                        url = delivery.url,
                        attempt,
                        response_code = ?result.as_ref().ok(),
                        "webhook rejected; not retrying"
                    );
                    metric_inc("webhook.delivery.failed");
                    return NotifyOutcome::Failed { attempts: attempt };
                }
                AttemptClass::Retryable if will_retry => {
                    warn!(
                        event = delivery.event,
                        url = delivery.url,
                        attempt,
                        error = ?result.as_ref().err(),
                        response_code = ?result.as_ref().ok(),
                        "webhook attempt failed; retry scheduled"
                    );
                    metric_inc("webhook.delivery.retry_scheduled");
                }
                AttemptClass::Retryable => {}
            }
        }

        warn!(event = delivery.event, url = delivery.url, max_attempts, "webhook attempts exhausted");
        metric_inc("webhook.delivery.failed");
        NotifyOutcome::Failed { attempts: max_attempts }
    }

    async fn deliver_once(&self, delivery: &Delivery<'_>) -> NotifyOutcome {
        let result = self
            .transport
            .post(delivery.url, delivery.signature, delivery.body)
            .await;

        // Any HTTP response counts as sent.
        let status = match &result {
            Ok(_) => AttemptStatus::Success,
            Err(_) => AttemptStatus::Failed,
        };
        self.record(delivery, 1, status, &result, None).await;

        match result {
            Ok(code) => {
                info!(event = delivery.event, url = delivery.url, response_code = code, "webhook sent");
                metric_inc("webhook.delivery.success");
                NotifyOutcome::Delivered { attempts: 1 }
            }
            Err(err) => {
                warn!(event = delivery.event, url = delivery.url, error = %err, "webhook send failed");
                metric_inc("webhook.delivery.failed");
                NotifyOutcome::Failed { attempts: 1 }
            }
        }
    }

    async fn record(
        &self,
        delivery: &Delivery<'_>,
        attempt: u32,
        status: AttemptStatus,
        result: &Result<u16, TransportError>,
        next_retry_at: Option<DateTime<Utc>>,
    ) {
        let record = DeliveryAttempt {
            merchant_id: delivery.entity.merchant_id.clone(),
            event_type: delivery.event.to_string(),
            webhook_url: delivery.url.to_string(),
            attempt,
            status,
            response_code: result.as_ref().ok().copied(),
            next_retry_at,
            created_at: Utc::now(),
        };

        // A lost log row must not stop delivery.
        if let Err(err) = self.store.record_attempt(&record).await {
            error!(event = delivery.event, attempt, error = %err, "failed to record delivery attempt");
        }
    }
}
