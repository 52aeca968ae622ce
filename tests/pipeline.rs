//! End-to-end pipeline scenarios over the in-memory adapters.
//!
//! Both roles share one store and one queue adapter through `Arc`, with the
//! send-delay zeroed and the poll backoff tightened so the tests settle in
//! milliseconds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use resizeq::backoff::BackoffConfig;
use resizeq::config::{ConsumerConfig, PipelineConfig, ProducerConfig};
use resizeq::consumer::{CycleOutcome, JobConsumer, Shutdown};
use resizeq::correlate::Session;
use resizeq::producer::JobProducer;
use resizeq::queue::{MemoryQueue, MessageQueue};
use resizeq::store::{MemoryStore, ObjectStore};
use resizeq::transform::{Transform, TransformError};

/// Transform that copies inputs to outputs unchanged, preserving filenames.
struct CopyTransform;

#[async_trait]
impl Transform for CopyTransform {
    async fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<(), TransformError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let mut entries = tokio::fs::read_dir(input_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::copy(entry.path(), output_dir.join(entry.file_name())).await?;
            }
        }
        Ok(())
    }
}

/// Transform that produces nothing and reports a nonzero exit.
struct FailingTransform;

#[async_trait]
impl Transform for FailingTransform {
    async fn run(&self, _input_dir: &Path, _output_dir: &Path) -> Result<(), TransformError> {
        Err(TransformError::NonZeroExit {
            code: 1,
            stderr: "simulated resize failure".to_string(),
        })
    }
}

fn fast_pipeline() -> PipelineConfig {
    PipelineConfig::default()
        .with_send_delay(Duration::ZERO)
        .with_backoff(
            BackoffConfig::default()
                .with_initial(Duration::from_millis(1))
                .with_max(Duration::from_millis(10)),
        )
}

struct TestDirs {
    _roots: Vec<tempfile::TempDir>,
    upload: PathBuf,
    download: PathBuf,
    inbox: PathBuf,
    outbox: PathBuf,
}

fn test_dirs() -> TestDirs {
    let roots: Vec<tempfile::TempDir> = (0..4).map(|_| tempfile::tempdir().unwrap()).collect();
    let paths: Vec<PathBuf> = roots.iter().map(|d| d.path().to_path_buf()).collect();
    TestDirs {
        upload: paths[0].clone(),
        download: paths[1].clone(),
        inbox: paths[2].clone(),
        outbox: paths[3].clone(),
        _roots: roots,
    }
}

fn producer_config(dirs: &TestDirs) -> ProducerConfig {
    ProducerConfig::default()
        .with_pipeline(fast_pipeline())
        .with_upload_dir(&dirs.upload)
        .with_download_dir(&dirs.download)
}

fn consumer_config(dirs: &TestDirs) -> ConsumerConfig {
    ConsumerConfig::default()
        .with_pipeline(fast_pipeline())
        .with_inbox_dir(&dirs.inbox)
        .with_outbox_dir(&dirs.outbox)
}

#[tokio::test]
async fn single_image_round_trip() {
    let dirs = test_dirs();
    tokio::fs::write(dirs.upload.join("cat.png"), b"cat-bytes")
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());

    let mut consumer = JobConsumer::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        CopyTransform,
        consumer_config(&dirs),
    );
    consumer.setup().await.unwrap();

    let producer = JobProducer::with_session(
        Arc::clone(&store),
        Arc::clone(&queue),
        producer_config(&dirs),
        Session::with_id("S1"),
    );
    let producer_task = tokio::spawn(async move { producer.run().await });

    let mut shutdown = Shutdown::never();
    let outcome = consumer.resize_once(&mut shutdown).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { results: 1 });

    let report = producer_task.await.unwrap().unwrap();
    assert_eq!(report.uploaded, vec!["S1_cat.png".to_string()]);
    assert_eq!(report.collected, vec!["resized_S1_cat.png".to_string()]);

    // The result landed locally with its result key as the filename.
    let downloaded = dirs.download.join("resized_S1_cat.png");
    assert_eq!(tokio::fs::read(&downloaded).await.unwrap(), b"cat-bytes");

    // The store has been drained on both sides, and the result queue is
    // fully consumed.
    assert_eq!(store.object_count("resizeq-images"), Some(0));
    let result_url = queue.url_for("resize-results").await.unwrap();
    assert!(queue.is_empty(&result_url));
}

#[tokio::test]
async fn multiple_images_complete_exactly() {
    let dirs = test_dirs();
    for name in ["a.png", "b.png", "c.png"] {
        tokio::fs::write(dirs.upload.join(name), name.as_bytes())
            .await
            .unwrap();
    }

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());

    let mut consumer = JobConsumer::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        CopyTransform,
        consumer_config(&dirs),
    );
    consumer.setup().await.unwrap();

    let (stop_tx, stop_rx) = broadcast::channel(1);
    let consumer_task = tokio::spawn(async move {
        let mut shutdown = Shutdown::listening(stop_rx);
        loop {
            match consumer.resize_once(&mut shutdown).await.unwrap() {
                CycleOutcome::Interrupted => break,
                CycleOutcome::Completed { .. } => {}
            }
        }
    });

    let producer = JobProducer::with_session(
        Arc::clone(&store),
        Arc::clone(&queue),
        producer_config(&dirs),
        Session::with_id("S2"),
    );
    let report = producer.run().await.unwrap();

    stop_tx.send(()).unwrap();
    consumer_task.await.unwrap();

    // Completion set is exactly the derived result keys, no extras.
    let mut collected = report.collected.clone();
    collected.sort();
    assert_eq!(
        collected,
        vec![
            "resized_S2_a.png".to_string(),
            "resized_S2_b.png".to_string(),
            "resized_S2_c.png".to_string(),
        ]
    );
    for key in &collected {
        assert!(dirs.download.join(key).exists());
    }
    assert_eq!(store.object_count("resizeq-images"), Some(0));
}

#[tokio::test]
async fn duplicate_result_delivery_is_counted_once() {
    let dirs = test_dirs();
    tokio::fs::write(dirs.upload.join("cat.png"), b"img")
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    store.create_bucket_if_absent("resizeq-images").await.unwrap();
    queue.create_if_absent("resize-requests").await.unwrap();
    let result_url = queue.create_if_absent("resize-results").await.unwrap();

    // Stage the result object and deliver its message twice, as an
    // at-least-once queue may.
    store
        .put("resizeq-images", "resized_S1_cat.png", b"resized")
        .await
        .unwrap();
    queue
        .send(&result_url, "resized_S1_cat.png", Duration::ZERO)
        .await
        .unwrap();
    queue
        .send(&result_url, "resized_S1_cat.png", Duration::ZERO)
        .await
        .unwrap();

    let producer = JobProducer::with_session(
        Arc::clone(&store),
        Arc::clone(&queue),
        producer_config(&dirs),
        Session::with_id("S1"),
    );
    let report = producer.run().await.unwrap();

    // One collection, one download, and both deliveries acknowledged.
    assert_eq!(report.collected, vec!["resized_S1_cat.png".to_string()]);
    assert_eq!(report.downloaded.len(), 1);
    assert!(queue.is_empty(&result_url));
    // Only the un-consumed request object remains.
    assert_eq!(store.object_count("resizeq-images"), Some(1));
}

#[tokio::test]
async fn out_of_session_results_are_left_alone() {
    let dirs = test_dirs();
    tokio::fs::write(dirs.upload.join("cat.png"), b"img")
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    store.create_bucket_if_absent("resizeq-images").await.unwrap();
    queue.create_if_absent("resize-requests").await.unwrap();
    let result_url = queue.create_if_absent("resize-results").await.unwrap();

    // A different session's result arrives first.
    queue
        .send(&result_url, "resized_OTHER_dog.png", Duration::ZERO)
        .await
        .unwrap();

    store
        .put("resizeq-images", "resized_S1_cat.png", b"resized")
        .await
        .unwrap();
    queue
        .send(&result_url, "resized_S1_cat.png", Duration::ZERO)
        .await
        .unwrap();

    let producer = JobProducer::with_session(
        Arc::clone(&store),
        Arc::clone(&queue),
        producer_config(&dirs),
        Session::with_id("S1"),
    );
    let report = producer.run().await.unwrap();

    assert_eq!(report.collected, vec!["resized_S1_cat.png".to_string()]);
    // The foreign message is still queued for its owner.
    assert_eq!(queue.len(&result_url), Some(1));
}

#[tokio::test]
async fn failed_transform_sends_nothing_and_drops_the_batch() {
    let dirs = test_dirs();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());

    let mut consumer = JobConsumer::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        FailingTransform,
        consumer_config(&dirs),
    );
    consumer.setup().await.unwrap();

    // Stage one request as a producer would.
    let request_url = queue.url_for("resize-requests").await.unwrap();
    store
        .put("resizeq-images", "S1_cat.png", b"img")
        .await
        .unwrap();
    queue
        .send(&request_url, "S1_cat.png", Duration::ZERO)
        .await
        .unwrap();

    let mut shutdown = Shutdown::never();
    let outcome = consumer.resize_once(&mut shutdown).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { results: 0 });

    // The job is gone everywhere: input deleted locally and in the store,
    // nothing uploaded, nothing announced.
    assert!(!dirs.inbox.join("S1_cat.png").exists());
    assert_eq!(store.object_count("resizeq-images"), Some(0));
    let result_url = queue.url_for("resize-results").await.unwrap();
    assert!(queue.is_empty(&result_url));
}

#[tokio::test]
async fn producer_blocks_until_results_arrive() {
    let dirs = test_dirs();
    tokio::fs::write(dirs.upload.join("cat.png"), b"img")
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    store.create_bucket_if_absent("resizeq-images").await.unwrap();
    queue.create_if_absent("resize-requests").await.unwrap();
    queue.create_if_absent("resize-results").await.unwrap();

    let producer = JobProducer::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        producer_config(&dirs),
    );

    // With no consumer there is never a result; the collection loop has no
    // timeout of its own and must still be running when ours fires.
    let outcome = tokio::time::timeout(Duration::from_millis(100), producer.run()).await;
    assert!(outcome.is_err());
}

#[tokio::test]
async fn teardown_drains_paginated_bucket_and_deletes_queues() {
    let dirs = test_dirs();

    // Small pages force the drain loop through multiple truncated listings.
    let store = Arc::new(MemoryStore::with_page_size(7));
    let queue = Arc::new(MemoryQueue::new());

    let mut consumer = JobConsumer::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        CopyTransform,
        consumer_config(&dirs),
    );
    consumer.setup().await.unwrap();

    for i in 0..25 {
        store
            .put("resizeq-images", &format!("k{i:03}"), b"x")
            .await
            .unwrap();
    }

    consumer.clean_up().await;

    assert!(!store.bucket_exists("resizeq-images"));
    assert!(queue.url_for("resize-requests").await.is_err());
    assert!(queue.url_for("resize-results").await.is_err());
}
