//! Job consumer: setup, processing loop, teardown.
//!
//! The consumer owns the provider-side lifecycle. Setup is idempotent:
//! bucket and queues are created if absent and the queue endpoints cached.
//! Each processing cycle accepts at least one request, downloads the
//! referenced objects, runs the external transform best-effort, uploads
//! whatever outputs exist under result keys, and answers with one result
//! message per upload. Teardown drains the bucket page by page, deletes it,
//! and deletes both queues, logging rather than failing.
//!
//! A shutdown signal is observed between pipeline stages, never mid-call:
//! an in-flight store or queue operation always completes, so no object is
//! orphaned half-written.

use std::path::Path;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ConsumerConfig;
use crate::correlate;
use crate::error::PipelineError;
use crate::queue::{MessageQueue, QueueUrl};
use crate::store::ObjectStore;
use crate::transform::Transform;

/// Latching view of the shutdown broadcast channel.
///
/// `triggered` keeps returning true once the signal has been observed, so
/// it can be polled at every stage boundary.
pub struct Shutdown {
    rx: broadcast::Receiver<()>,
    // Keeps the channel open for the never-triggered case.
    _tx: Option<broadcast::Sender<()>>,
    latched: bool,
}

impl Shutdown {
    /// Wraps a receiver wired to the process signal handler.
    pub fn listening(rx: broadcast::Receiver<()>) -> Self {
        Self {
            rx,
            _tx: None,
            latched: false,
        }
    }

    /// A shutdown that never fires. Used by one-shot commands and tests.
    pub fn never() -> Self {
        let (tx, rx) = broadcast::channel(1);
        Self {
            rx,
            _tx: Some(tx),
            latched: false,
        }
    }

    /// Returns whether shutdown has been requested.
    pub fn triggered(&mut self) -> bool {
        if self.latched {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                self.latched = true;
                true
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => {
                // Missed deliveries can only be shutdown signals.
                self.latched = true;
                true
            }
            Err(broadcast::error::TryRecvError::Empty) => false,
        }
    }
}

/// Outcome of one processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran to the end, sending `results` result messages.
    Completed { results: usize },
    /// Shutdown was observed at a stage boundary; the cycle stopped early.
    Interrupted,
}

struct Endpoints {
    request_url: QueueUrl,
    result_url: QueueUrl,
}

/// Consumer side of the pipeline.
pub struct JobConsumer<S, Q, T> {
    store: S,
    queue: Q,
    transform: T,
    config: ConsumerConfig,
    endpoints: Option<Endpoints>,
}

impl<S: ObjectStore, Q: MessageQueue, T: Transform> JobConsumer<S, Q, T> {
    /// Creates a consumer. Call [`setup`](Self::setup) before processing.
    pub fn new(store: S, queue: Q, transform: T, config: ConsumerConfig) -> Self {
        Self {
            store,
            queue,
            transform,
            config,
            endpoints: None,
        }
    }

    /// Idempotent setup: creates the bucket and both queues if absent and
    /// caches the queue endpoints. Calling it again re-resolves the same
    /// state and raises no error.
    pub async fn setup(&mut self) -> Result<(), PipelineError> {
        let pipeline = &self.config.pipeline;
        self.store.create_bucket_if_absent(&pipeline.bucket).await?;
        let request_url = self.queue.create_if_absent(&pipeline.request_queue).await?;
        let result_url = self.queue.create_if_absent(&pipeline.result_queue).await?;
        info!(
            bucket = %pipeline.bucket,
            request_queue = %request_url,
            result_queue = %result_url,
            "Consumer ready"
        );
        self.endpoints = Some(Endpoints {
            request_url,
            result_url,
        });
        Ok(())
    }

    fn endpoints(&self) -> Result<&Endpoints, PipelineError> {
        self.endpoints.as_ref().ok_or(PipelineError::SetupRequired)
    }

    /// Runs one processing cycle: accept requests, download, transform,
    /// upload, notify.
    ///
    /// Transform failure (including a transform that cannot be spawned) is
    /// logged and the cycle continues with whatever outputs exist. The inbox
    /// is cleared unconditionally afterward, so a failed batch is dropped
    /// rather than reprocessed; the producer waiting on it will block until
    /// killed. That data loss is the documented policy, not an accident.
    pub async fn resize_once(
        &self,
        shutdown: &mut Shutdown,
    ) -> Result<CycleOutcome, PipelineError> {
        let endpoints = self.endpoints()?;

        let Some(accepted) = self.accept_requests(endpoints, shutdown).await? else {
            return Ok(CycleOutcome::Interrupted);
        };

        self.download_requests(&accepted).await?;
        if shutdown.triggered() {
            warn!(
                dropped = accepted.len(),
                "Shutdown observed after download; dropping accepted batch"
            );
            return Ok(CycleOutcome::Interrupted);
        }

        if let Err(e) = self
            .transform
            .run(&self.config.inbox_dir, &self.config.outbox_dir)
            .await
        {
            warn!(error = %e, "Transform failed; continuing with whatever outputs exist");
        }
        // Inputs go away whether or not the transform produced anything, so
        // a stale duplicate can never be reprocessed on a later cycle.
        self.clear_dir(&self.config.inbox_dir).await?;

        let result_keys = self.upload_outputs(&accepted).await?;

        for key in &result_keys {
            self.queue
                .send(
                    &endpoints.result_url,
                    key,
                    self.config.pipeline.send_delay,
                )
                .await?;
            debug!(key = %key, "Result message sent");
        }

        info!(
            requests = accepted.len(),
            results = result_keys.len(),
            "Cycle complete"
        );
        Ok(CycleOutcome::Completed {
            results: result_keys.len(),
        })
    }

    /// Best-effort teardown: drain the bucket, delete it, delete both
    /// queues. Store errors are logged and the remaining steps still run.
    pub async fn clean_up(&self) {
        let pipeline = &self.config.pipeline;
        info!(bucket = %pipeline.bucket, "Draining bucket");

        let mut cursor = None;
        loop {
            match self.store.list_page(&pipeline.bucket, cursor.take()).await {
                Ok(page) => {
                    for key in &page.keys {
                        if let Err(e) = self.store.delete(&pipeline.bucket, key).await {
                            warn!(key = %key, error = %e, "Failed to delete object");
                        }
                    }
                    match page.cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Listing failed; abandoning bucket drain");
                    break;
                }
            }
        }

        if let Err(e) = self.store.delete_bucket(&pipeline.bucket).await {
            warn!(bucket = %pipeline.bucket, error = %e, "Failed to delete bucket");
        } else {
            info!(bucket = %pipeline.bucket, "Bucket deleted");
        }

        for name in [&pipeline.request_queue, &pipeline.result_queue] {
            match self.queue.url_for(name).await {
                Ok(url) => {
                    if let Err(e) = self.queue.delete_queue(&url).await {
                        warn!(queue = %name, error = %e, "Failed to delete queue");
                    } else {
                        info!(queue = %name, "Queue deleted");
                    }
                }
                Err(e) => warn!(queue = %name, error = %e, "Failed to resolve queue"),
            }
        }

        info!("Cleanup complete");
    }

    /// Polls the request queue until at least one non-result message is
    /// accepted, deleting each accepted message immediately. Returns `None`
    /// if shutdown is observed while still idle.
    async fn accept_requests(
        &self,
        endpoints: &Endpoints,
        shutdown: &mut Shutdown,
    ) -> Result<Option<Vec<String>>, PipelineError> {
        let mut backoff = Backoff::new(self.config.pipeline.backoff.clone());
        let mut accepted = Vec::new();

        info!("Waiting for resize requests");
        loop {
            if shutdown.triggered() {
                return Ok(None);
            }

            let batch = self.queue.receive(&endpoints.request_url).await?;
            if batch.is_empty() {
                backoff.wait().await;
                continue;
            }
            backoff.reset();

            for msg in batch {
                if correlate::is_result(&msg.body) {
                    // A result key on the request queue is never new work;
                    // leave it for whoever is actually waiting on it.
                    debug!(body = %msg.body, "Ignoring result-prefixed message");
                    continue;
                }
                self.queue
                    .delete(&endpoints.request_url, &msg.receipt)
                    .await?;
                accepted.push(msg.body);
            }

            if !accepted.is_empty() {
                info!(requests = accepted.len(), "Requests accepted");
                return Ok(Some(accepted));
            }
        }
    }

    /// Downloads each accepted key into the inbox and removes the store
    /// object.
    async fn download_requests(&self, keys: &[String]) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.config.inbox_dir).await?;
        for key in keys {
            let bytes = self.store.get(&self.config.pipeline.bucket, key).await?;
            let path = self.config.inbox_dir.join(key);
            tokio::fs::write(&path, &bytes).await?;
            self.store.delete(&self.config.pipeline.bucket, key).await?;
            debug!(path = %path.display(), "Request downloaded");
        }
        Ok(())
    }

    /// Uploads each outbox file under its result key and deletes the local
    /// file. Output filenames must equal accepted request keys; anything
    /// else means the transform broke the filename contract, and the file is
    /// treated as a failed output rather than mis-attributed to a job.
    async fn upload_outputs(&self, accepted: &[String]) -> Result<Vec<String>, PipelineError> {
        tokio::fs::create_dir_all(&self.config.outbox_dir).await?;

        let mut outputs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.outbox_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                outputs.push(entry.path());
            }
        }
        outputs.sort();

        let mut result_keys = Vec::new();
        for path in outputs {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if !accepted.iter().any(|key| *key == name) {
                warn!(
                    file = %name,
                    "Transform output does not match any accepted request; discarding"
                );
                tokio::fs::remove_file(&path).await?;
                continue;
            }

            let result_key = correlate::result_key(&name);
            let bytes = tokio::fs::read(&path).await?;
            self.store
                .put(&self.config.pipeline.bucket, &result_key, &bytes)
                .await?;
            tokio::fs::remove_file(&path).await?;
            info!(key = %result_key, "Result uploaded");
            result_keys.push(result_key);
        }

        Ok(result_keys)
    }

    /// Removes every regular file in a directory.
    async fn clear_dir(&self, dir: &Path) -> Result<(), PipelineError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}
