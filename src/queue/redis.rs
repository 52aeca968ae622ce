//! Redis-backed message queue adapter.
//!
//! Layout per queue (url is `mq:{name}`):
//!
//! - `mq:queues`: set of queue names
//! - `{url}:bodies`: hash of message id to body
//! - `{url}:ready`: zset of message ids scored by visible-at (epoch ms)
//! - `{url}:inflight`: zset of message ids scored by visibility deadline
//!
//! A send with delay lands in the ready zset scored in the future, so it is
//! invisible until the delay elapses. A receive first re-promotes in-flight
//! entries whose deadline has passed (the at-least-once redelivery path),
//! then claims due ready entries by removing them from the ready zset; the
//! removal doubles as the claim, so two receivers cannot take the same
//! delivery.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{
    MessageQueue, QueueError, QueueUrl, ReceiptHandle, ReceivedMessage, RECEIVE_BATCH_MAX,
};

const QUEUES_KEY: &str = "mq:queues";

/// How long a received message stays invisible before redelivery.
const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

/// Message queue over a Redis instance.
pub struct RedisQueue {
    redis: ConnectionManager,
    visibility: Duration,
}

impl RedisQueue {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            redis,
            visibility: DEFAULT_VISIBILITY,
        })
    }

    /// Creates a queue adapter from an existing connection manager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self {
            redis,
            visibility: DEFAULT_VISIBILITY,
        }
    }

    /// Sets the visibility window for received messages.
    pub fn with_visibility(mut self, visibility: Duration) -> Self {
        self.visibility = visibility;
        self
    }

    fn url(name: &str) -> QueueUrl {
        QueueUrl(format!("mq:{name}"))
    }

    fn bodies_key(url: &QueueUrl) -> String {
        format!("{url}:bodies")
    }

    fn ready_key(url: &QueueUrl) -> String {
        format!("{url}:ready")
    }

    fn inflight_key(url: &QueueUrl) -> String {
        format!("{url}:inflight")
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl MessageQueue for RedisQueue {
    async fn create_if_absent(&self, name: &str) -> Result<QueueUrl, QueueError> {
        let mut conn = self.redis.clone();
        // SADD is a no-op when the member is already present.
        conn.sadd::<_, _, ()>(QUEUES_KEY, name).await?;
        Ok(Self::url(name))
    }

    async fn url_for(&self, name: &str) -> Result<QueueUrl, QueueError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.sismember(QUEUES_KEY, name).await?;
        if exists {
            Ok(Self::url(name))
        } else {
            Err(QueueError::QueueNotFound(name.to_string()))
        }
    }

    async fn send(&self, url: &QueueUrl, body: &str, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let id = Uuid::new_v4().to_string();
        let visible_at = Self::now_ms() + delay.as_millis() as u64;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(Self::bodies_key(url), &id, body)
            .zadd(Self::ready_key(url), &id, visible_at);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn receive(&self, url: &QueueUrl) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut conn = self.redis.clone();
        let now = Self::now_ms();
        let ready = Self::ready_key(url);
        let inflight = Self::inflight_key(url);
        let bodies = Self::bodies_key(url);

        // Redeliver: anything whose visibility deadline passed goes back to
        // ready, immediately visible.
        let expired: Vec<String> = conn.zrangebyscore(&inflight, 0, now).await?;
        for id in &expired {
            let mut pipe = redis::pipe();
            pipe.atomic().zrem(&inflight, id).zadd(&ready, id, now);
            pipe.query_async::<_, ()>(&mut conn).await?;
        }

        let due: Vec<String> = conn
            .zrangebyscore_limit(&ready, 0, now, 0, RECEIVE_BATCH_MAX as isize)
            .await?;

        let deadline = now + self.visibility.as_millis() as u64;
        let mut batch = Vec::new();
        for id in due {
            // ZREM is the claim: only the caller that removes the entry
            // owns this delivery.
            let claimed: usize = conn.zrem(&ready, &id).await?;
            if claimed == 0 {
                continue;
            }
            let body: Option<String> = conn.hget(&bodies, &id).await?;
            let Some(body) = body else {
                continue;
            };
            conn.zadd::<_, _, _, ()>(&inflight, &id, deadline).await?;
            batch.push(ReceivedMessage {
                body,
                receipt: ReceiptHandle(id),
            });
        }

        Ok(batch)
    }

    async fn delete(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrem(Self::inflight_key(url), &receipt.0)
            .zrem(Self::ready_key(url), &receipt.0)
            .hdel(Self::bodies_key(url), &receipt.0);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete_queue(&self, url: &QueueUrl) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let name = url.0.strip_prefix("mq:").unwrap_or(&url.0).to_string();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(Self::bodies_key(url))
            .del(Self::ready_key(url))
            .del(Self::inflight_key(url))
            .srem(QUEUES_KEY, name);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
