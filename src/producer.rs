//! Job producer: one session end to end.
//!
//! A run uploads every regular file in the upload directory under a
//! session-scoped request key, sends one delayed request message per key,
//! then polls the result queue until every submitted job has been matched,
//! and finally downloads the matched results and removes them from the
//! store.
//!
//! Matching is strict: a message is consumed only when it equals the derived
//! result key of one of this session's outstanding requests. Duplicate
//! deliveries of an already-collected result are acknowledged but not
//! re-counted and not re-downloaded. Messages belonging to other sessions
//! are left un-deleted so their owners can still receive them.
//!
//! Any store or queue error aborts the whole run; partial failures surface
//! immediately instead of being retried or silently dropped.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::backoff::Backoff;
use crate::config::ProducerConfig;
use crate::correlate::{self, Session};
use crate::error::PipelineError;
use crate::queue::{MessageQueue, QueueUrl};
use crate::store::ObjectStore;

/// Summary of one completed producer session.
#[derive(Debug, Clone, Serialize)]
pub struct ProducerReport {
    /// The session id that namespaced this run's keys.
    pub session_id: String,
    /// Request keys uploaded, in submission order.
    pub uploaded: Vec<String>,
    /// Result keys collected, in arrival order.
    pub collected: Vec<String>,
    /// Local paths the results were downloaded to.
    pub downloaded: Vec<PathBuf>,
}

/// Producer for one session.
pub struct JobProducer<S, Q> {
    store: S,
    queue: Q,
    config: ProducerConfig,
    session: Session,
}

impl<S: ObjectStore, Q: MessageQueue> JobProducer<S, Q> {
    /// Creates a producer with a fresh session id.
    pub fn new(store: S, queue: Q, config: ProducerConfig) -> Self {
        Self::with_session(store, queue, config, Session::new())
    }

    /// Creates a producer with a caller-chosen session.
    pub fn with_session(store: S, queue: Q, config: ProducerConfig, session: Session) -> Self {
        Self {
            store,
            queue,
            config,
            session,
        }
    }

    /// Returns the session for this run.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs the session: upload, request, collect, download.
    ///
    /// Blocks until every submitted job has produced a matched result; there
    /// is no timeout. If the consumer drops a job the loop never terminates,
    /// which is the documented failure surface of this protocol.
    pub async fn run(&self) -> Result<ProducerReport, PipelineError> {
        let uploaded = self.upload_inputs().await?;

        let request_url = self
            .queue
            .url_for(&self.config.pipeline.request_queue)
            .await?;
        let result_url = self
            .queue
            .url_for(&self.config.pipeline.result_queue)
            .await?;

        for key in &uploaded {
            self.queue
                .send(&request_url, key, self.config.pipeline.send_delay)
                .await?;
            debug!(key = %key, "Request message sent");
        }
        info!(jobs = uploaded.len(), "All resize requests submitted");

        let collected = self.collect_results(&result_url, &uploaded).await?;
        let downloaded = self.download_results(&collected).await?;

        info!(
            session = %self.session.id(),
            results = collected.len(),
            "Session complete"
        );

        Ok(ProducerReport {
            session_id: self.session.id().to_string(),
            uploaded,
            collected,
            downloaded,
        })
    }

    /// Uploads every regular file in the upload directory under its request
    /// key, returning the keys in submission order.
    async fn upload_inputs(&self) -> Result<Vec<String>, PipelineError> {
        let dir = &self.config.upload_dir;

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(PipelineError::EmptyUploadDir(dir.clone()));
        }

        info!(
            dir = %dir.display(),
            bucket = %self.config.pipeline.bucket,
            files = files.len(),
            "Uploading inputs"
        );

        let mut uploaded = Vec::with_capacity(files.len());
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = self.session.request_key(&name);
            let bytes = tokio::fs::read(&path).await?;
            self.store
                .put(&self.config.pipeline.bucket, &key, &bytes)
                .await?;
            info!(key = %key, "Input uploaded");
            uploaded.push(key);
        }

        Ok(uploaded)
    }

    /// Polls the result queue until every request key has a matched result.
    async fn collect_results(
        &self,
        result_url: &QueueUrl,
        request_keys: &[String],
    ) -> Result<Vec<String>, PipelineError> {
        let mut outstanding: HashSet<&str> = request_keys.iter().map(String::as_str).collect();
        let mut collected = Vec::with_capacity(request_keys.len());
        let mut backoff = Backoff::new(self.config.pipeline.backoff.clone());

        while collected.len() < request_keys.len() {
            let batch = self.queue.receive(result_url).await?;
            if batch.is_empty() {
                debug!(
                    outstanding = outstanding.len(),
                    "No results yet; backing off"
                );
                backoff.wait().await;
                continue;
            }
            backoff.reset();

            for msg in batch {
                let matched = request_keys
                    .iter()
                    .find(|key| correlate::matches(&msg.body, key));
                let Some(key) = matched else {
                    // Not ours. Leave it un-deleted for whichever session it
                    // belongs to.
                    debug!(body = %msg.body, "Ignoring out-of-session message");
                    continue;
                };

                if outstanding.remove(key.as_str()) {
                    self.queue.delete(result_url, &msg.receipt).await?;
                    info!(result = %msg.body, "Result collected");
                    collected.push(msg.body);
                } else {
                    // At-least-once redelivery of a result already collected
                    // this run. Acknowledge it, count nothing.
                    self.queue.delete(result_url, &msg.receipt).await?;
                    debug!(result = %msg.body, "Duplicate result delivery ignored");
                }
            }
        }

        Ok(collected)
    }

    /// Downloads each collected result and removes it from the store.
    async fn download_results(
        &self,
        result_keys: &[String],
    ) -> Result<Vec<PathBuf>, PipelineError> {
        tokio::fs::create_dir_all(&self.config.download_dir).await?;

        let mut downloaded = Vec::with_capacity(result_keys.len());
        for key in result_keys {
            let bytes = self.store.get(&self.config.pipeline.bucket, key).await?;
            let path = self.config.download_dir.join(key);
            tokio::fs::write(&path, &bytes).await?;
            self.store.delete(&self.config.pipeline.bucket, key).await?;
            info!(path = %path.display(), "Result downloaded");
            downloaded.push(path);
        }

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;

    fn test_config(upload: &std::path::Path, download: &std::path::Path) -> ProducerConfig {
        ProducerConfig::default()
            .with_upload_dir(upload)
            .with_download_dir(download)
            .with_pipeline(
                crate::config::PipelineConfig::default()
                    .with_send_delay(std::time::Duration::ZERO),
            )
    }

    #[tokio::test]
    async fn test_empty_upload_dir_is_fatal() {
        let upload = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();

        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        store
            .create_bucket_if_absent(crate::config::DEFAULT_BUCKET)
            .await
            .unwrap();
        queue
            .create_if_absent(crate::config::DEFAULT_REQUEST_QUEUE)
            .await
            .unwrap();
        queue
            .create_if_absent(crate::config::DEFAULT_RESULT_QUEUE)
            .await
            .unwrap();

        let producer =
            JobProducer::new(store, queue, test_config(upload.path(), download.path()));
        let err = producer.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyUploadDir(_)));
    }

    #[tokio::test]
    async fn test_upload_uses_session_scoped_keys() {
        let upload = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        tokio::fs::write(upload.path().join("cat.png"), b"img")
            .await
            .unwrap();

        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        store
            .create_bucket_if_absent(crate::config::DEFAULT_BUCKET)
            .await
            .unwrap();

        let producer = JobProducer::with_session(
            store,
            queue,
            test_config(upload.path(), download.path()),
            Session::with_id("S1"),
        );
        let keys = producer.upload_inputs().await.unwrap();
        assert_eq!(keys, vec!["S1_cat.png".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_queue_is_fatal() {
        let upload = tempfile::tempdir().unwrap();
        let download = tempfile::tempdir().unwrap();
        tokio::fs::write(upload.path().join("cat.png"), b"img")
            .await
            .unwrap();

        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        store
            .create_bucket_if_absent(crate::config::DEFAULT_BUCKET)
            .await
            .unwrap();
        // Queues never created: url_for must fail and abort the run.

        let producer =
            JobProducer::new(store, queue, test_config(upload.path(), download.path()));
        let err = producer.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Queue(_)));
    }
}
