//! Object store capability.
//!
//! The pipeline treats blob storage as an external collaborator with
//! put/get/delete/list semantics over a flat key namespace inside a single
//! bucket. Adapters implement [`ObjectStore`]; the rest of the crate never
//! names a concrete provider.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the backing provider.
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),

    /// Bucket does not exist.
    #[error("bucket '{0}' not found")]
    BucketNotFound(String),

    /// Object does not exist.
    #[error("object '{key}' not found in bucket '{bucket}'")]
    ObjectNotFound { bucket: String, key: String },

    /// Provider call failed.
    #[error("store operation failed: {0}")]
    Provider(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Provider(err.to_string())
    }
}

/// One page of a bucket listing.
///
/// `cursor` is `Some` when the listing is truncated; passing it back to
/// [`ObjectStore::list_page`] continues where this page left off.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Keys on this page, in adapter order.
    pub keys: Vec<String>,
    /// Continuation cursor, absent on the final page.
    pub cursor: Option<String>,
}

/// Blob storage addressed by (bucket, key).
///
/// Implemented for `Arc<T>` as well, so one adapter instance can back both
/// roles inside a single process.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates the bucket if it does not already exist.
    ///
    /// An already-existing bucket is success, not an error.
    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<(), StoreError>;

    /// Stores an object, replacing any existing object under the key.
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Retrieves an object's bytes.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Deletes an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Lists one page of keys, continuing from `cursor` if given.
    async fn list_page(
        &self,
        bucket: &str,
        cursor: Option<String>,
    ) -> Result<ListPage, StoreError>;

    /// Deletes the bucket itself. The bucket is expected to be empty.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<(), StoreError> {
        (**self).create_bucket_if_absent(bucket).await
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).put(bucket, key, bytes).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        (**self).delete(bucket, key).await
    }

    async fn list_page(
        &self,
        bucket: &str,
        cursor: Option<String>,
    ) -> Result<ListPage, StoreError> {
        (**self).list_page(bucket, cursor).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        (**self).delete_bucket(bucket).await
    }
}
