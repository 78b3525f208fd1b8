use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::QueueError;
use crate::queue::{CounterStore, WorkQueue};
use crate::types::QueueName;

/// Redis-backed work queue and counters.
///
/// Jobs are `LPUSH`ed and consumed with `BRPOP`, which gives FIFO order
/// per list and checks lists in argument order when several are ready.
/// Counters are plain integer keys updated with `INCR` / `DECR`.
pub struct RedisQueue {
    client: redis::Client,
}

impl RedisQueue {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn open(url: &str) -> Result<Self, QueueError> {
        Ok(Self::new(redis::Client::open(url)?))
    }

    async fn connection(&self) -> Result<redis::aio::Connection, QueueError> {
        Ok(self.client.get_tokio_connection().await?)
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn push(&self, queue: &QueueName, payload: String) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.lpush(queue.as_str(), payload).await?;
        Ok(())
    }

    async fn pop_blocking(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> Result<Option<(QueueName, String)>, QueueError> {
        let mut conn = self.connection().await?;
        let keys: Vec<&str> = queues.iter().map(QueueName::as_str).collect();
        // Integer timeout for compatibility with Redis < 6; 0 would block forever.
        let timeout_secs = wait.as_secs().max(1);

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(keys)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(popped.map(|(key, item)| (QueueName(key), item)))
    }

    async fn len(&self, queue: &QueueName) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(queue.as_str()).await?)
    }

    async fn clear(&self, queue: &QueueName) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(queue.as_str()).await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisQueue {
    async fn incr(&self, key: &str) -> Result<i64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.incr(key, 1).await?)
    }

    async fn decr(&self, key: &str) -> Result<i64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.decr(key, 1).await?)
    }

    async fn get(&self, key: &str) -> Result<i64, QueueError> {
        let mut conn = self.connection().await?;
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}
