use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{HandlerError, StoreError};
use crate::notifier::{NotifyOutcome, WebhookNotifier};
use crate::store::SettlementStore;
use crate::types::{EntityId, JobKind, SettlementStatus};

/// How the simulated processor decides an outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutcomeMode {
    AlwaysSucceed,
    AlwaysFail,
    /// Succeed with the given probability in `[0, 1]`.
    Probabilistic { success_probability: f64 },
}

impl OutcomeMode {
    pub fn forced(success: bool) -> Self {
        if success {
            OutcomeMode::AlwaysSucceed
        } else {
            OutcomeMode::AlwaysFail
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Artificial processing latency before the outcome is decided.
    pub processing_delay: Duration,
    pub payment_outcome: OutcomeMode,
    pub refund_outcome: OutcomeMode,
}

impl Default for SimulatorConfig {
    /// 3 second delay; payments succeed 70% of the time, refunds always.
    fn default() -> Self {
        Self {
            processing_delay: Duration::from_secs(3),
            payment_outcome: OutcomeMode::Probabilistic { success_probability: 0.7 },
            refund_outcome: OutcomeMode::AlwaysSucceed,
        }
    }
}

/// Result of settling one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This job moved the entity to a final status and notified the merchant.
    Settled(SettlementStatus),
    /// The entity was already final (or another job got there first).
    /// Nothing was written and no webhook was sent.
    Duplicate(SettlementStatus),
}

/// Simulates payment/refund processing and persists the outcome.
pub struct SettlementSimulator {
    store: Arc<dyn SettlementStore>,
    notifier: Arc<WebhookNotifier>,
    config: SimulatorConfig,
    rng: Mutex<fastrand::Rng>,
}

impl SettlementSimulator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        notifier: Arc<WebhookNotifier>,
        config: SimulatorConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Use a seeded generator for reproducible probabilistic outcomes.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(fastrand::Rng::with_seed(seed));
        self
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub async fn settle_payment(&self, id: &EntityId) -> Result<SettleOutcome, HandlerError> {
        self.settle(JobKind::Payment, id).await
    }

    pub async fn settle_refund(&self, id: &EntityId) -> Result<SettleOutcome, HandlerError> {
        self.settle(JobKind::Refund, id).await
    }

    /// Settle one entity, then notify the merchant of the final status.
    ///
    /// Status writes are compare-and-set: `pending|processing -> processing`
    /// then `processing -> success|failed`. A final status is never left.
    pub async fn settle(&self, kind: JobKind, id: &EntityId) -> Result<SettleOutcome, HandlerError> {
        let mut entity = self
            .store
            .fetch_entity(kind, id)
            .await?
            .ok_or_else(|| StoreError::NotFound { kind, id: id.clone() })?;

        if entity.status.is_terminal() {
            warn!(kind = %kind, entity_id = %id, status = %entity.status, "entity already settled; skipping job");
            return Ok(SettleOutcome::Duplicate(entity.status));
        }

        let claimed = self
            .store
            .transition_status(
                kind,
                id,
                &[SettlementStatus::Pending, SettlementStatus::Processing],
                SettlementStatus::Processing,
            )
            .await?;
        if !claimed {
            return self.duplicate(kind, id).await;
        }

        tokio::time::sleep(self.config.processing_delay).await;

        let final_status = self.decide(kind).await;
        let applied = self
            .store
            .transition_status(kind, id, &[SettlementStatus::Processing], final_status)
            .await?;
        if !applied {
            return self.duplicate(kind, id).await;
        }

        info!(kind = %kind, entity_id = %id, status = %final_status, "settled");

        entity.status = final_status;
        let notified = self.notifier.notify(&entity, final_status).await;
        if notified == NotifyOutcome::Errored {
            warn!(kind = %kind, entity_id = %id, "settled but merchant notification errored");
        }

        Ok(SettleOutcome::Settled(final_status))
    }

    async fn decide(&self, kind: JobKind) -> SettlementStatus {
        let mode = match kind {
            JobKind::Payment => self.config.payment_outcome,
            JobKind::Refund => self.config.refund_outcome,
        };

        let success = match mode {
            OutcomeMode::AlwaysSucceed => true,
            OutcomeMode::AlwaysFail => false,
            OutcomeMode::Probabilistic { success_probability } => {
                self.rng.lock().await.f64() < success_probability
            }
        };

        if success {
            SettlementStatus::Success
        } else {
            SettlementStatus::Failed
        }
    }

    async fn duplicate(&self, kind: JobKind, id: &EntityId) -> Result<SettleOutcome, HandlerError> {
        let current = self
            .store
            .fetch_entity(kind, id)
            .await?
            .map(|e| e.status)
            .ok_or_else(|| StoreError::NotFound { kind, id: id.clone() })?;

        warn!(kind = %kind, entity_id = %id, status = %current, "lost settlement race; skipping job");
        Ok(SettleOutcome::Duplicate(current))
    }
}
