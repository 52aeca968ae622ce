//! resizeq: queue-mediated image resize pipeline.
//!
//! A producer uploads local images to an object store and requests work via
//! a message queue; a consumer picks up requests, invokes an external
//! resizer, and answers through a second queue; the producer correlates the
//! results back to its jobs by a session-scoped key naming scheme.

pub mod backoff;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod correlate;
pub mod error;
pub mod producer;
pub mod queue;
pub mod store;
pub mod transform;

// Re-export commonly used types
pub use error::PipelineError;
