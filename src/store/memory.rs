//! In-memory object store adapter.
//!
//! The zero-infrastructure provider: used by the integration tests and for
//! running both roles inside one process without a Redis instance. Listing
//! pages over sorted keys with a configurable page size so the paginated
//! drain path is exercised without thousands of objects.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{ListPage, ObjectStore, StoreError};

/// Default number of keys per listing page.
const DEFAULT_PAGE_SIZE: usize = 1000;

type Bucket = BTreeMap<String, Vec<u8>>;

/// Object store held entirely in process memory.
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    page_size: usize,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates an empty store with a custom listing page size.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Returns the number of objects in a bucket, if it exists.
    pub fn object_count(&self, bucket: &str) -> Option<usize> {
        let buckets = self.buckets.lock().expect("store lock poisoned");
        buckets.get(bucket).map(|b| b.len())
    }

    /// Returns whether the bucket exists.
    pub fn bucket_exists(&self, bucket: &str) -> bool {
        let buckets = self.buckets.lock().expect("store lock poisoned");
        buckets.contains_key(bucket)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().expect("store lock poisoned");
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().expect("store lock poisoned");
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        b.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let buckets = self.buckets.lock().expect("store lock poisoned");
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        b.get(key).cloned().ok_or_else(|| StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().expect("store lock poisoned");
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        b.remove(key);
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        cursor: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let buckets = self.buckets.lock().expect("store lock poisoned");
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        // The cursor is the last key of the previous page; keys are sorted,
        // so everything strictly after it is the remainder.
        let keys: Vec<String> = match &cursor {
            Some(last) => b
                .range::<String, _>((
                    std::ops::Bound::Excluded(last.clone()),
                    std::ops::Bound::Unbounded,
                ))
                .take(self.page_size)
                .map(|(k, _)| k.clone())
                .collect(),
            None => b.keys().take(self.page_size).cloned().collect(),
        };

        let cursor = if keys.len() == self.page_size {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, cursor })
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().expect("store lock poisoned");
        buckets
            .remove(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        Ok(())
    }
}
