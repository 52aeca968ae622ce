//! CLI command definitions for resizeq.
//!
//! Wires the Redis-backed adapters into the producer and consumer and owns
//! the process lifecycle: `produce` runs one session and exits, `serve`
//! loops until interrupted and then tears down, `clean` runs teardown alone.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::backoff::BackoffConfig;
use crate::config::{
    ConsumerConfig, PipelineConfig, ProducerConfig, DEFAULT_BUCKET, DEFAULT_REQUEST_QUEUE,
    DEFAULT_RESULT_QUEUE,
};
use crate::consumer::{CycleOutcome, JobConsumer, Shutdown};
use crate::producer::JobProducer;
use crate::queue::RedisQueue;
use crate::store::RedisStore;
use crate::transform::{MogrifyTransform, DEFAULT_GEOMETRY, DEFAULT_PROGRAM};

/// Queue-mediated image resize pipeline.
#[derive(Parser)]
#[command(name = "resizeq")]
#[command(about = "Resize images through an object store and a pair of message queues")]
#[command(version)]
#[command(
    long_about = "resizeq runs an asynchronous resize pipeline: `produce` uploads local \
images and requests work over a queue; `serve` consumes requests, invokes an external \
resizer, and answers on a result queue; the producer correlates results back to its \
jobs by key.\n\nExample usage:\n  resizeq serve --geometry 800x600\n  resizeq produce --input ./upload --output ./download"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Upload local images, request resizing, and collect the results.
    #[command(alias = "client")]
    Produce(ProduceArgs),

    /// Serve resize requests until interrupted, then tear down.
    #[command(alias = "server")]
    Serve(ServeArgs),

    /// Tear down: drain and delete the bucket and both queues.
    Clean(CleanArgs),
}

/// Provider settings shared by every subcommand.
#[derive(Parser, Debug)]
pub struct ProviderArgs {
    /// Redis connection URL backing the object store and queues.
    #[arg(long, env = "RESIZEQ_REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    /// Object-store bucket.
    #[arg(long, default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    /// Request queue name.
    #[arg(long, default_value = DEFAULT_REQUEST_QUEUE)]
    pub request_queue: String,

    /// Result queue name.
    #[arg(long, default_value = DEFAULT_RESULT_QUEUE)]
    pub result_queue: String,

    /// Send-delay in seconds applied to every queue message.
    #[arg(long, default_value = "5")]
    pub delay_seconds: u64,

    /// Initial wait in milliseconds between empty queue receives.
    #[arg(long, default_value = "200")]
    pub poll_initial_ms: u64,

    /// Ceiling in milliseconds for the wait between empty receives.
    #[arg(long, default_value = "10000")]
    pub poll_max_ms: u64,
}

impl ProviderArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_bucket(&self.bucket)
            .with_request_queue(&self.request_queue)
            .with_result_queue(&self.result_queue)
            .with_send_delay(Duration::from_secs(self.delay_seconds))
            .with_backoff(
                BackoffConfig::default()
                    .with_initial(Duration::from_millis(self.poll_initial_ms))
                    .with_max(Duration::from_millis(self.poll_max_ms)),
            )
    }
}

/// Arguments for `resizeq produce`.
#[derive(Parser, Debug)]
pub struct ProduceArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    /// Directory holding the images to resize.
    #[arg(short = 'i', long, default_value = "upload")]
    pub input: PathBuf,

    /// Directory the resized images are downloaded into.
    #[arg(short = 'o', long, default_value = "download")]
    pub output: PathBuf,

    /// Print the session report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `resizeq serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    /// Working directory requests are downloaded into.
    #[arg(long, default_value = "inbox")]
    pub inbox: PathBuf,

    /// Working directory the resizer writes outputs into.
    #[arg(long, default_value = "outbox")]
    pub outbox: PathBuf,

    /// External resize program to invoke.
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    pub program: String,

    /// Target geometry passed to the resizer.
    #[arg(short = 'g', long, default_value = DEFAULT_GEOMETRY)]
    pub geometry: String,
}

/// Arguments for `resizeq clean`.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Produce(args) => run_produce(args).await,
        Commands::Serve(args) => run_serve(args).await,
        Commands::Clean(args) => run_clean(args).await,
    }
}

async fn connect(provider: &ProviderArgs) -> anyhow::Result<(RedisStore, RedisQueue)> {
    let client = redis::Client::open(provider.redis_url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    Ok((
        RedisStore::from_connection(manager.clone()),
        RedisQueue::from_connection(manager),
    ))
}

async fn run_produce(args: ProduceArgs) -> anyhow::Result<()> {
    let (store, queue) = connect(&args.provider).await?;
    let config = ProducerConfig::default()
        .with_pipeline(args.provider.pipeline_config())
        .with_upload_dir(args.input)
        .with_download_dir(args.output);

    let producer = JobProducer::new(store, queue, config);
    let report = producer.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            session = %report.session_id,
            uploaded = report.uploaded.len(),
            collected = report.collected.len(),
            "Produce finished"
        );
    }
    Ok(())
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let (store, queue) = connect(&args.provider).await?;
    let transform = MogrifyTransform::new()
        .with_program(args.program)
        .with_geometry(args.geometry);
    let config = ConsumerConfig::default()
        .with_pipeline(args.provider.pipeline_config())
        .with_inbox_dir(args.inbox)
        .with_outbox_dir(args.outbox);

    let mut consumer = JobConsumer::new(store, queue, transform, config);
    consumer.setup().await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received; draining after the current cycle");
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let mut shutdown = Shutdown::listening(shutdown_rx);
    loop {
        match consumer.resize_once(&mut shutdown).await? {
            CycleOutcome::Interrupted => break,
            CycleOutcome::Completed { .. } => {
                if shutdown.triggered() {
                    break;
                }
            }
        }
    }

    consumer.clean_up().await;
    Ok(())
}

async fn run_clean(args: CleanArgs) -> anyhow::Result<()> {
    let (store, queue) = connect(&args.provider).await?;
    let config = ConsumerConfig::default().with_pipeline(args.provider.pipeline_config());
    let consumer = JobConsumer::new(store, queue, MogrifyTransform::new(), config);
    consumer.clean_up().await;
    Ok(())
}
