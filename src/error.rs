//! Top-level error taxonomy for the pipeline.
//!
//! Provider errors (store/queue) are fatal to the run that hits them: no
//! retry, no partial cleanup, immediate propagation to the process boundary,
//! which exits nonzero. Transform failures are deliberately absent here:
//! they degrade the consumer's cycle instead of aborting it and never
//! propagate. Teardown logs instead of returning errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

/// Errors that abort a producer run or a consumer processing cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Usage error: the upload directory holds no regular files.
    #[error("no input files: put the images to resize in '{}'", .0.display())]
    EmptyUploadDir(PathBuf),

    /// The consumer was used before its setup phase ran.
    #[error("consumer endpoints not resolved; call setup first")]
    SetupRequired,

    /// Object store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Message queue call failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Local filesystem operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
