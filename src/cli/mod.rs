//! Command-line interface for resizeq.
//!
//! Provides the producer (`produce`), consumer (`serve`), and teardown
//! (`clean`) entry points.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
