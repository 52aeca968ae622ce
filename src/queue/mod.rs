//! Message queue capability.
//!
//! Queues carry opaque text bodies with at-least-once delivery: a received
//! message stays invisible for a visibility window and reappears if it is
//! not deleted in time, so consumers must tolerate duplicates. Sends carry a
//! delay that keeps the message invisible until its referenced object has
//! had time to become readable in the store; that delay is the one ordering
//! guarantee the protocol relies on across roles.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// Maximum number of messages returned by a single receive.
pub const RECEIVE_BATCH_MAX: usize = 10;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the backing provider.
    #[error("queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Queue does not exist.
    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    /// Provider call failed.
    #[error("queue operation failed: {0}")]
    Provider(String),
}

impl From<::redis::RedisError> for QueueError {
    fn from(err: ::redis::RedisError) -> Self {
        QueueError::Provider(err.to_string())
    }
}

/// Resolved handle for a queue, returned by create/url-for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueUrl(pub String);

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Acknowledgment token for one delivery of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle(pub String);

/// A message as delivered by a receive call.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Opaque text body.
    pub body: String,
    /// Token for deleting this delivery.
    pub receipt: ReceiptHandle,
}

/// At-least-once message queue with delayed sends and explicit deletion.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Creates the named queue if it does not already exist and returns its
    /// url. An already-existing queue is success, not an error.
    async fn create_if_absent(&self, name: &str) -> Result<QueueUrl, QueueError>;

    /// Resolves the url of an existing queue.
    async fn url_for(&self, name: &str) -> Result<QueueUrl, QueueError>;

    /// Sends a message that becomes receivable after `delay`.
    async fn send(&self, url: &QueueUrl, body: &str, delay: Duration) -> Result<(), QueueError>;

    /// Receives up to [`RECEIVE_BATCH_MAX`] visible messages without
    /// blocking. Returned messages stay invisible for the adapter's
    /// visibility window; callers poll with backoff when this is empty.
    async fn receive(&self, url: &QueueUrl) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Deletes (acknowledges) one delivery. Deleting an already-deleted
    /// message is not an error.
    async fn delete(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Deletes the queue and everything in it.
    async fn delete_queue(&self, url: &QueueUrl) -> Result<(), QueueError>;
}

#[async_trait]
impl<T: MessageQueue + ?Sized> MessageQueue for std::sync::Arc<T> {
    async fn create_if_absent(&self, name: &str) -> Result<QueueUrl, QueueError> {
        (**self).create_if_absent(name).await
    }

    async fn url_for(&self, name: &str) -> Result<QueueUrl, QueueError> {
        (**self).url_for(name).await
    }

    async fn send(&self, url: &QueueUrl, body: &str, delay: Duration) -> Result<(), QueueError> {
        (**self).send(url, body, delay).await
    }

    async fn receive(&self, url: &QueueUrl) -> Result<Vec<ReceivedMessage>, QueueError> {
        (**self).receive(url).await
    }

    async fn delete(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        (**self).delete(url, receipt).await
    }

    async fn delete_queue(&self, url: &QueueUrl) -> Result<(), QueueError> {
        (**self).delete_queue(url).await
    }
}
