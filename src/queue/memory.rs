//! In-memory message queue adapter.
//!
//! Mirrors the Redis adapter's semantics (delayed visibility, visibility
//! window on receive, redelivery of un-acked messages) without any backing
//! service. Used by the integration tests and for single-process runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::{
    MessageQueue, QueueError, QueueUrl, ReceiptHandle, ReceivedMessage, RECEIVE_BATCH_MAX,
};

/// How long a received message stays invisible before redelivery.
const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

struct Message {
    id: String,
    body: String,
    visible_at: Instant,
    /// Set while a delivery is outstanding; the message becomes visible
    /// again once this deadline passes without a delete.
    invisible_until: Option<Instant>,
}

/// Message queue held entirely in process memory.
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, Vec<Message>>>,
    visibility: Duration,
}

impl MemoryQueue {
    /// Creates an adapter with no queues.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            visibility: DEFAULT_VISIBILITY,
        }
    }

    /// Sets the visibility window for received messages.
    pub fn with_visibility(mut self, visibility: Duration) -> Self {
        self.visibility = visibility;
        self
    }

    /// Returns the total number of messages in the queue (visible or not),
    /// or `None` if the queue does not exist.
    pub fn len(&self, url: &QueueUrl) -> Option<usize> {
        let queues = self.queues.lock().expect("queue lock poisoned");
        queues.get(&url.0).map(|q| q.len())
    }

    /// Returns whether the queue exists and holds no messages.
    pub fn is_empty(&self, url: &QueueUrl) -> bool {
        self.len(url) == Some(0)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MessageQueue for MemoryQueue {
    async fn create_if_absent(&self, name: &str) -> Result<QueueUrl, QueueError> {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        queues.entry(name.to_string()).or_default();
        Ok(QueueUrl(name.to_string()))
    }

    async fn url_for(&self, name: &str) -> Result<QueueUrl, QueueError> {
        let queues = self.queues.lock().expect("queue lock poisoned");
        if queues.contains_key(name) {
            Ok(QueueUrl(name.to_string()))
        } else {
            Err(QueueError::QueueNotFound(name.to_string()))
        }
    }

    async fn send(&self, url: &QueueUrl, body: &str, delay: Duration) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        let q = queues
            .get_mut(&url.0)
            .ok_or_else(|| QueueError::QueueNotFound(url.0.clone()))?;
        q.push(Message {
            id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            visible_at: Instant::now() + delay,
            invisible_until: None,
        });
        Ok(())
    }

    async fn receive(&self, url: &QueueUrl) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        let q = queues
            .get_mut(&url.0)
            .ok_or_else(|| QueueError::QueueNotFound(url.0.clone()))?;

        let now = Instant::now();
        let mut batch = Vec::new();
        for msg in q.iter_mut() {
            if batch.len() >= RECEIVE_BATCH_MAX {
                break;
            }
            if msg.visible_at > now {
                continue;
            }
            if let Some(deadline) = msg.invisible_until {
                if deadline > now {
                    continue;
                }
            }
            msg.invisible_until = Some(now + self.visibility);
            batch.push(ReceivedMessage {
                body: msg.body.clone(),
                receipt: ReceiptHandle(msg.id.clone()),
            });
        }

        Ok(batch)
    }

    async fn delete(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        let q = queues
            .get_mut(&url.0)
            .ok_or_else(|| QueueError::QueueNotFound(url.0.clone()))?;
        q.retain(|m| m.id != receipt.0);
        Ok(())
    }

    async fn delete_queue(&self, url: &QueueUrl) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        queues.remove(&url.0);
        Ok(())
    }
}
