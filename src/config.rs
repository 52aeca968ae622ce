//! Pipeline configuration.
//!
//! Plain structs with defaults and builder-style setters. The shared part
//! (bucket, queue names, send-delay, backoff bounds) must agree between the
//! producer and consumer processes or they will simply never see each
//! other's messages.

use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::BackoffConfig;

/// Default object-store bucket.
pub const DEFAULT_BUCKET: &str = "resizeq-images";

/// Default request queue name.
pub const DEFAULT_REQUEST_QUEUE: &str = "resize-requests";

/// Default result queue name.
pub const DEFAULT_RESULT_QUEUE: &str = "resize-results";

/// Default send-delay on every queue message.
///
/// The delay bounds the window in which a message could be received before
/// its referenced object is readable in the store. It is an ordering
/// guarantee the protocol relies on, not a tuning knob to zero out in
/// production.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_secs(5);

/// Settings shared by both roles.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Object-store bucket holding request and result objects.
    pub bucket: String,
    /// Queue carrying request keys.
    pub request_queue: String,
    /// Queue carrying result keys.
    pub result_queue: String,
    /// Delay applied to every sent message.
    pub send_delay: Duration,
    /// Backoff bounds for empty receives.
    pub backoff: BackoffConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            request_queue: DEFAULT_REQUEST_QUEUE.to_string(),
            result_queue: DEFAULT_RESULT_QUEUE.to_string(),
            send_delay: DEFAULT_SEND_DELAY,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Sets the bucket name.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Sets the request queue name.
    pub fn with_request_queue(mut self, name: impl Into<String>) -> Self {
        self.request_queue = name.into();
        self
    }

    /// Sets the result queue name.
    pub fn with_result_queue(mut self, name: impl Into<String>) -> Self {
        self.result_queue = name.into();
        self
    }

    /// Sets the send-delay.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Sets the backoff bounds.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Producer-side settings.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Shared pipeline settings.
    pub pipeline: PipelineConfig,
    /// Directory scanned for files to resize.
    pub upload_dir: PathBuf,
    /// Directory resized results are downloaded into.
    pub download_dir: PathBuf,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            upload_dir: PathBuf::from("upload"),
            download_dir: PathBuf::from("download"),
        }
    }
}

impl ProducerConfig {
    /// Sets the shared pipeline settings.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the upload directory.
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// Sets the download directory.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }
}

/// Consumer-side settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Shared pipeline settings.
    pub pipeline: PipelineConfig,
    /// Working directory request objects are downloaded into.
    pub inbox_dir: PathBuf,
    /// Working directory the transform writes outputs into.
    pub outbox_dir: PathBuf,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            inbox_dir: PathBuf::from("inbox"),
            outbox_dir: PathBuf::from("outbox"),
        }
    }
}

impl ConsumerConfig {
    /// Sets the shared pipeline settings.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the inbox working directory.
    pub fn with_inbox_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inbox_dir = dir.into();
        self
    }

    /// Sets the outbox working directory.
    pub fn with_outbox_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.outbox_dir = dir.into();
        self
    }
}
