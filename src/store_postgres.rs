use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Row};

use crate::error::StoreError;
use crate::store::SettlementStore;
use crate::types::{
    AttemptStatus, DeliveryAttempt, EntityId, JobKind, MerchantId, SettleableEntity,
    SettlementStatus, WebhookEndpoint,
};

/// PostgreSQL-backed settlement store.
///
/// Reads `payments`, `refunds` and `merchants`, which belong to the API
/// layer. Their `status` columns are plain text. Ids are compared as text,
/// so uuid or integer keys also work. `webhook_logs` is created on demand;
/// if it already exists, merchant ids are cast to its `merchant_id` type
/// on insert.
pub struct PostgresStore {
    client: Client,
    insert_attempt: String,
}

impl PostgresStore {
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_logs (
                    id BIGSERIAL PRIMARY KEY,
                    merchant_id TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    webhook_url TEXT NOT NULL,
                    attempt INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    response_code INTEGER,
                    next_retry_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
                &[],
            )
            .await?;

        let merchant_id_type: String = client
            .query_one(
                "SELECT format_type(atttypid, atttypmod)
                 FROM pg_attribute
                 WHERE attrelid = 'webhook_logs'::regclass
                   AND attname = 'merchant_id'
                   AND NOT attisdropped",
                &[],
            )
            .await?
            .try_get(0)?;

        Ok(Self {
            client,
            insert_attempt: insert_attempt_sql(&merchant_id_type),
        })
    }

    fn table(kind: JobKind) -> &'static str {
        match kind {
            JobKind::Payment => "payments",
            JobKind::Refund => "refunds",
        }
    }

    fn parse_status(value: &str) -> Result<SettlementStatus, StoreError> {
        SettlementStatus::parse(value)
            .ok_or_else(|| StoreError::Backend(format!("unknown status `{value}`")))
    }

    fn entity_from_row(kind: JobKind, row: &Row) -> Result<SettleableEntity, StoreError> {
        let status: String = row.try_get(1)?;
        let payment_id = match kind {
            JobKind::Payment => None,
            JobKind::Refund => Some(EntityId(row.try_get(4)?)),
        };

        Ok(SettleableEntity {
            id: EntityId(row.try_get(0)?),
            kind,
            status: Self::parse_status(&status)?,
            amount: row.try_get(2)?,
            merchant_id: MerchantId(row.try_get(3)?),
            payment_id,
        })
    }

    fn attempt_from_row(row: &Row) -> Result<DeliveryAttempt, StoreError> {
        let status: String = row.try_get(4)?;
        let status = match status.as_str() {
            "success" => AttemptStatus::Success,
            _ => AttemptStatus::Failed,
        };
        let attempt: i32 = row.try_get(3)?;
        let response_code: Option<i32> = row.try_get(5)?;

        Ok(DeliveryAttempt {
            merchant_id: MerchantId(row.try_get(0)?),
            event_type: row.try_get(1)?,
            webhook_url: row.try_get(2)?,
            attempt: attempt.max(0) as u32,
            status,
            response_code: response_code.and_then(|c| u16::try_from(c).ok()),
            next_retry_at: row.try_get::<_, Option<DateTime<Utc>>>(6)?,
            created_at: row.try_get(7)?,
        })
    }
}

#[async_trait]
impl SettlementStore for PostgresStore {
    async fn fetch_entity(
        &self,
        kind: JobKind,
        id: &EntityId,
    ) -> Result<Option<SettleableEntity>, StoreError> {
        let query = match kind {
            JobKind::Payment => {
                "SELECT p.id::text, p.status::text, p.amount::bigint, p.merchant_id::text
                 FROM payments p
                 WHERE p.id::text = $1"
            }
            JobKind::Refund => {
                "SELECT r.id::text, r.status::text, r.amount::bigint, p.merchant_id::text,
                        r.payment_id::text
                 FROM refunds r
                 JOIN payments p ON p.id = r.payment_id
                 WHERE r.id::text = $1"
            }
        };

        let row = self.client.query_opt(query, &[&id.0]).await?;
        row.map(|row| Self::entity_from_row(kind, &row)).transpose()
    }

    async fn transition_status(
        &self,
        kind: JobKind,
        id: &EntityId,
        expected: &[SettlementStatus],
        status: SettlementStatus,
    ) -> Result<bool, StoreError> {
        let table = Self::table(kind);
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();

        let updated = self
            .client
            .execute(
                &format!(
                    "UPDATE {table} SET status = $1
                     WHERE id::text = $2 AND status::text = ANY($3)"
                ),
                &[&status.as_str(), &id.0, &expected],
            )
            .await?;

        if updated > 0 {
            return Ok(true);
        }

        let exists = self
            .client
            .query_opt(&format!("SELECT 1 FROM {table} WHERE id::text = $1"), &[&id.0])
            .await?;

        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound { kind, id: id.clone() }),
        }
    }

    async fn webhook_endpoint(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT webhook_url, webhook_secret FROM merchants WHERE id::text = $1",
                &[&merchant_id.0],
            )
            .await?;

        row.map(|row| {
            Ok(WebhookEndpoint {
                url: row.try_get(0)?,
                secret: row.try_get(1)?,
            })
        })
        .transpose()
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        let attempt_no = attempt.attempt as i32;
        let response_code = attempt.response_code.map(i32::from);

        self.client
            .execute(
                self.insert_attempt.as_str(),
                &[
                    &attempt.merchant_id.0,
                    &attempt.event_type,
                    &attempt.webhook_url,
                    &attempt_no,
                    &attempt.status.as_str(),
                    &response_code,
                    &attempt.next_retry_at,
                    &attempt.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_attempts(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT merchant_id::text, event_type, webhook_url, attempt, status,
                        response_code, next_retry_at, created_at
                 FROM webhook_logs
                 WHERE merchant_id::text = $1
                 ORDER BY created_at DESC, id DESC",
                &[&merchant_id.0],
            )
            .await?;

        rows.iter().map(Self::attempt_from_row).collect()
    }
}

/// `$1` is bound as text and cast to the column's actual type, which is
/// read from the catalog and never from input.
fn insert_attempt_sql(merchant_id_type: &str) -> String {
    format!(
        "INSERT INTO webhook_logs (
            merchant_id, event_type, webhook_url,
            attempt, status, response_code, next_retry_at, created_at
         )
         VALUES ($1::text::{merchant_id_type}, $2, $3, $4, $5, $6, $7, $8)"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_binds_merchant_id_as_text() {
        let sql = insert_attempt_sql("uuid");
        assert!(sql.contains("VALUES ($1::text::uuid, $2"), "{sql}");

        let sql = insert_attempt_sql("integer");
        assert!(sql.contains("$1::text::integer"), "{sql}");

        let sql = insert_attempt_sql("text");
        assert!(sql.contains("$1::text::text"), "{sql}");
    }
}
