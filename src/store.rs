use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{
    DeliveryAttempt, EntityId, JobKind, MerchantId, SettleableEntity, SettlementStatus,
    WebhookEndpoint,
};

/// Persistence collaborator: payments, refunds, merchant webhook
/// configuration and the delivery-attempt log.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn fetch_entity(
        &self,
        kind: JobKind,
        id: &EntityId,
    ) -> Result<Option<SettleableEntity>, StoreError>;

    /// Set `status` only if the current status is one of `expected`.
    ///
    /// Returns whether the write happened.
    async fn transition_status(
        &self,
        kind: JobKind,
        id: &EntityId,
        expected: &[SettlementStatus],
        status: SettlementStatus,
    ) -> Result<bool, StoreError>;

    async fn webhook_endpoint(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Option<WebhookEndpoint>, StoreError>;

    /// Append one delivery attempt. Records are never updated.
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError>;

    /// Delivery attempts for a merchant, newest first.
    async fn list_attempts(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<DeliveryAttempt>, StoreError>;
}

/// In-memory store for tests and lightweight deployments.
#[derive(Default)]
pub struct InMemoryStore {
    entities: Mutex<HashMap<(JobKind, EntityId), SettleableEntity>>,
    endpoints: Mutex<HashMap<MerchantId, WebhookEndpoint>>,
    attempts: Mutex<Vec<DeliveryAttempt>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_entity(&self, entity: SettleableEntity) {
        self.entities
            .lock()
            .await
            .insert((entity.kind, entity.id.clone()), entity);
    }

    pub async fn set_endpoint(&self, merchant_id: impl Into<String>, endpoint: WebhookEndpoint) {
        self.endpoints
            .lock()
            .await
            .insert(MerchantId(merchant_id.into()), endpoint);
    }

    pub async fn status_of(&self, kind: JobKind, id: &str) -> Option<SettlementStatus> {
        self.entities
            .lock()
            .await
            .get(&(kind, EntityId(id.to_string())))
            .map(|e| e.status)
    }

    /// Every attempt in insertion order.
    pub async fn attempts(&self) -> Vec<DeliveryAttempt> {
        self.attempts.lock().await.clone()
    }
}

#[async_trait]
impl SettlementStore for InMemoryStore {
    async fn fetch_entity(
        &self,
        kind: JobKind,
        id: &EntityId,
    ) -> Result<Option<SettleableEntity>, StoreError> {
        Ok(self.entities.lock().await.get(&(kind, id.clone())).cloned())
    }

    async fn transition_status(
        &self,
        kind: JobKind,
        id: &EntityId,
        expected: &[SettlementStatus],
        status: SettlementStatus,
    ) -> Result<bool, StoreError> {
        let mut entities = self.entities.lock().await;
        let entity = entities
            .get_mut(&(kind, id.clone()))
            .ok_or_else(|| StoreError::NotFound { kind, id: id.clone() })?;

        if !expected.contains(&entity.status) {
            return Ok(false);
        }
        entity.status = status;
        Ok(true)
    }

    async fn webhook_endpoint(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        Ok(self.endpoints.lock().await.get(merchant_id).cloned())
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        self.attempts.lock().await.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .iter()
            .rev()
            .filter(|a| &a.merchant_id == merchant_id)
            .cloned()
            .collect())
    }
}
