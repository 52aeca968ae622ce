//! Redis-backed object store adapter.
//!
//! Layout:
//!
//! - `os:buckets`: set of bucket names
//! - `os:bucket:{bucket}:keys`: set of object keys in the bucket
//! - `os:obj:{bucket}:{key}`: object bytes
//!
//! Listing pages over the key set with SSCAN, so the drain loop in teardown
//! sees the same truncated-listing shape a real provider exposes.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{ListPage, ObjectStore, StoreError};

const BUCKETS_KEY: &str = "os:buckets";

/// How many keys to ask for per listing page. SSCAN treats this as a hint.
const LIST_PAGE_HINT: usize = 1000;

/// Object store over a Redis instance.
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self { redis })
    }

    /// Creates a store from an existing connection manager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn keys_key(bucket: &str) -> String {
        format!("os:bucket:{bucket}:keys")
    }

    fn object_key(bucket: &str, key: &str) -> String {
        format!("os:obj:{bucket}:{key}")
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.sismember(BUCKETS_KEY, bucket).await?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for RedisStore {
    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        // SADD is a no-op when the member is already present.
        conn.sadd::<_, _, ()>(BUCKETS_KEY, bucket).await?;
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.ensure_bucket(bucket).await?;
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(Self::keys_key(bucket), key)
            .set(Self::object_key(bucket, key), bytes);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.ensure_bucket(bucket).await?;
        let mut conn = self.redis.clone();
        let bytes: Option<Vec<u8>> = conn.get(Self::object_key(bucket, key)).await?;
        bytes.ok_or_else(|| StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.ensure_bucket(bucket).await?;
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(Self::keys_key(bucket), key)
            .del(Self::object_key(bucket, key));
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        cursor: Option<String>,
    ) -> Result<ListPage, StoreError> {
        self.ensure_bucket(bucket).await?;
        let mut conn = self.redis.clone();
        let cursor = cursor.unwrap_or_else(|| "0".to_string());

        let (next_cursor, keys): (String, Vec<String>) = redis::cmd("SSCAN")
            .arg(Self::keys_key(bucket))
            .arg(&cursor)
            .arg("COUNT")
            .arg(LIST_PAGE_HINT)
            .query_async(&mut conn)
            .await?;

        let cursor = if next_cursor == "0" {
            None
        } else {
            Some(next_cursor)
        };

        Ok(ListPage { keys, cursor })
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.ensure_bucket(bucket).await?;
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(Self::keys_key(bucket))
            .srem(BUCKETS_KEY, bucket);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
